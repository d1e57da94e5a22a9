pub mod consumer;
pub mod entry;
pub mod log;
pub mod memory;
pub mod publisher;
pub mod redis_log;

pub use consumer::LogConsumer;
pub use log::EventLog;
pub use memory::MemoryEventLog;
pub use publisher::EventPublisher;
pub use redis_log::RedisEventLog;

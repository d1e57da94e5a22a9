//! Real-time connection gateway: connection protocol, registry, and
//! dispatch to live sockets.

pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;
pub mod sockets;

pub use dispatcher::Dispatcher;
pub use handler::ConnectionGateway;
pub use registry::ConnectionRegistry;

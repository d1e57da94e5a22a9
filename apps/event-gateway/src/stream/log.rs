use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;

/// One entry as stored in the log: its id and raw string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// Where a group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to any consumer in the group.
    New,
    /// This consumer's own delivered-but-unacknowledged entries with ids
    /// greater than the given one (`"0"` for all of them).
    PendingAfter(String),
}

impl ReadFrom {
    pub fn pending() -> Self {
        ReadFrom::PendingAfter("0".to_string())
    }

    pub fn as_stream_id(&self) -> &str {
        match self {
            ReadFrom::New => ">",
            ReadFrom::PendingAfter(id) => id,
        }
    }
}

/// Append-only log with consumer-group reads and acknowledgment.
///
/// Backed by a Redis stream in production and an in-memory log in tests.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Create `group` at the start of `stream`, creating the stream if needed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus, Error>;

    /// Read up to `count` entries for `consumer`. Reads of new entries wait
    /// up to `block` when nothing is available; pending reads never wait.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: &ReadFrom,
        count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, Error>;

    /// Acknowledge entries, removing them from the group's pending list.
    /// Returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize, Error>;

    /// Append an entry and return its log-assigned id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, Error>;

    async fn ping(&self) -> Result<(), Error>;
}

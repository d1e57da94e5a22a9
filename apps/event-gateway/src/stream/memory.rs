//! In-memory event log with consumer-group semantics, for tests and local
//! runs without Redis.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::error::Error;

use super::log::{EventLog, GroupStatus, RawEntry, ReadFrom};

struct StoredEntry {
    seq: u64,
    entry: RawEntry,
}

#[derive(Default)]
struct GroupState {
    /// Index into `StreamState::entries` of the next never-delivered entry.
    next_index: usize,
    /// seq → owning consumer, for delivered but unacknowledged entries.
    pending: BTreeMap<u64, String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StoredEntry>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
pub struct MemoryEventLog {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    failing_reads: AtomicUsize,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` group reads fail, to exercise read-error handling.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Number of delivered but unacknowledged entries in `group`.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    fn take_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn try_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: &ReadFrom,
        count: usize,
    ) -> Result<Vec<RawEntry>, Error> {
        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| no_group(stream, group))?;
        let StreamState { entries, groups, .. } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        match from {
            ReadFrom::New => {
                let batch: Vec<&StoredEntry> =
                    entries.iter().skip(group_state.next_index).take(count).collect();
                group_state.next_index += batch.len();
                for stored in &batch {
                    group_state.pending.insert(stored.seq, consumer.to_string());
                }
                Ok(batch.into_iter().map(|s| s.entry.clone()).collect())
            }
            ReadFrom::PendingAfter(after) => {
                let after = parse_seq(after)?;
                let owned: Vec<u64> = group_state
                    .pending
                    .range(after + 1..)
                    .filter(|(_, owner)| owner.as_str() == consumer)
                    .map(|(seq, _)| *seq)
                    .take(count)
                    .collect();
                Ok(owned
                    .into_iter()
                    .filter_map(|seq| entries.iter().find(|s| s.seq == seq))
                    .map(|s| s.entry.clone())
                    .collect())
            }
        }
    }
}

fn no_group(stream: &str, group: &str) -> Error {
    Error::LogStore(format!(
        "NOGROUP no such key '{stream}' or consumer group '{group}'"
    ))
}

/// Ids look like `<seq>-0`; a bare number is accepted as well.
fn parse_seq(id: &str) -> Result<u64, Error> {
    id.split('-')
        .next()
        .and_then(|seq| seq.parse().ok())
        .ok_or_else(|| Error::LogStore(format!("invalid stream id '{id}'")))
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus, Error> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Ok(GroupStatus::AlreadyExists);
        }
        state.groups.insert(group.to_string(), GroupState::default());
        Ok(GroupStatus::Created)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: &ReadFrom,
        count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, Error> {
        if self.take_failure() {
            return Err(Error::LogStore("simulated read failure".to_string()));
        }

        let deadline = Instant::now() + block;
        loop {
            // Registered before checking so an append in between is not missed.
            let appended = self.appended.notified();

            let batch = self.try_read(stream, group, consumer, from, count)?;
            if !batch.is_empty() || *from != ReadFrom::New || block.is_zero() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || time::timeout(remaining, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize, Error> {
        let mut streams = self.streams.lock();
        let Some(group_state) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };

        let mut acked = 0;
        for id in ids {
            if group_state.pending.remove(&parse_seq(id)?).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, Error> {
        let id = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            state.last_seq += 1;
            let id = format!("{}-0", state.last_seq);
            state.entries.push(StoredEntry {
                seq: state.last_seq,
                entry: RawEntry {
                    id: id.clone(),
                    fields: fields.iter().cloned().collect(),
                },
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}

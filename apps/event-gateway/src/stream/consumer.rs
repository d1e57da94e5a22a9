//! Background task that reads the shared event log through a consumer group
//! and hands each entry to the dispatcher.
//!
//! Entries are acknowledged only after their dispatch attempt, so an entry
//! read but not acknowledged before a crash is redelivered to this consumer
//! on restart (pending entries are drained before reading new ones).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::Error;
use crate::gateway::Dispatcher;

use super::entry::{LogEntry, Target};
use super::log::{EventLog, GroupStatus, RawEntry, ReadFrom};

pub struct LogConsumer {
    log: Arc<dyn EventLog>,
    dispatcher: Dispatcher,
    config: StreamConfig,
}

impl LogConsumer {
    pub fn new(log: Arc<dyn EventLog>, dispatcher: Dispatcher, config: StreamConfig) -> Self {
        Self {
            log,
            dispatcher,
            config,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            stream = %self.config.key,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "event consumer starting"
        );

        if self.ensure_group(&cancel).await && self.recover_pending(&cancel).await {
            self.read_loop(&cancel).await;
        }

        tracing::info!(consumer = %self.config.consumer, "event consumer stopped");
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Create the group, retrying until it exists. `false` if cancelled first.
    async fn ensure_group(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self
                .log
                .create_group(&self.config.key, &self.config.group)
                .await
            {
                Ok(GroupStatus::Created) => {
                    tracing::info!(group = %self.config.group, "consumer group created");
                    return true;
                }
                Ok(GroupStatus::AlreadyExists) => {
                    tracing::warn!(group = %self.config.group, "consumer group already exists");
                    return true;
                }
                Err(err) => {
                    tracing::error!(%err, group = %self.config.group, "failed to create consumer group");
                    if !self.backoff(cancel).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Redeliver entries this consumer read but never acknowledged.
    async fn recover_pending(&self, cancel: &CancellationToken) -> bool {
        let mut cursor = ReadFrom::pending();
        let mut recovered = 0usize;

        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => return false,
                read = self.read(&cursor, Duration::ZERO) => read,
            };

            match read {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    recovered += batch.len();
                    if let Some(last) = batch.last() {
                        cursor = ReadFrom::PendingAfter(last.id.clone());
                    }
                    for raw in &batch {
                        self.process_entry(raw).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to read pending entries");
                    if !self.backoff(cancel).await {
                        return false;
                    }
                }
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "redelivered pending entries");
        }
        true
    }

    // -----------------------------------------------------------------------
    // Read loop
    // -----------------------------------------------------------------------

    async fn read_loop(&self, cancel: &CancellationToken) {
        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = self.read(&ReadFrom::New, self.config.block) => read,
            };

            match read {
                Ok(batch) => {
                    for raw in &batch {
                        self.process_entry(raw).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        %err,
                        backoff_ms = self.config.read_backoff.as_millis() as u64,
                        "event log read failed"
                    );
                    if !self.backoff(cancel).await {
                        break;
                    }
                }
            }
        }
    }

    async fn read(
        &self,
        from: &ReadFrom,
        block: Duration,
    ) -> Result<Vec<RawEntry>, Error> {
        self.log
            .read_group(
                &self.config.key,
                &self.config.group,
                &self.config.consumer,
                from,
                self.config.batch_size,
                block,
            )
            .await
    }

    /// Dispatch one entry, then acknowledge it whatever the outcome.
    async fn process_entry(&self, raw: &RawEntry) {
        match LogEntry::decode(raw) {
            Ok(entry) => {
                dispatch_entry(&self.dispatcher, &entry).await;
            }
            Err(err) => {
                tracing::error!(%err, id = %raw.id, "dropping undeliverable log entry");
            }
        }

        if let Err(err) = self
            .log
            .ack(&self.config.key, &self.config.group, std::slice::from_ref(&raw.id))
            .await
        {
            tracing::warn!(%err, id = %raw.id, "failed to acknowledge log entry");
        }
    }

    /// Sleep for the read backoff. `false` if cancelled meanwhile.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            () = time::sleep(self.config.read_backoff) => true,
        }
    }
}

/// Route a decoded entry to its target.
pub async fn dispatch_entry(dispatcher: &Dispatcher, entry: &LogEntry) -> bool {
    let delivered = match &entry.target {
        Target::User(user_id) => {
            dispatcher
                .emit_to_user(*user_id, &entry.event, &entry.data)
                .await
        }
        Target::Users(user_ids) => {
            dispatcher
                .emit_to_users(user_ids, &entry.event, &entry.data)
                .await
        }
        Target::Room(room) => dispatcher.emit_to_room(room, &entry.event, &entry.data).await,
        Target::Broadcast => dispatcher.emit_to_all(&entry.event, &entry.data).await,
    };

    tracing::debug!(
        id = %entry.id,
        event = %entry.event,
        target = ?entry.target,
        delivered,
        "log entry dispatched"
    );
    delivered
}

//! Redis stream implementation of [`EventLog`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::error::Error;

use super::log::{EventLog, GroupStatus, RawEntry, ReadFrom};

/// Two managed connections: blocking group reads hold `reader` for up to the
/// block interval, so acks, appends and pings go through `writer`.
#[derive(Clone)]
pub struct RedisEventLog {
    reader: ConnectionManager,
    writer: ConnectionManager,
}

impl RedisEventLog {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)?;
        let reader = ConnectionManager::new(client.clone()).await?;
        let writer = ConnectionManager::new(client).await?;
        Ok(Self { reader, writer })
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus, Error> {
        let mut conn = self.writer.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream, group, "0")
            .await
        {
            Ok(()) => Ok(GroupStatus::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupStatus::AlreadyExists),
            Err(e) => Err(e.into()),
        }
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
        let mut opts = StreamReadOptions::default().group(group, consumer).count(count);
        // BLOCK 0 waits forever, so only set it for a real interval.
        if *from == ReadFrom::New && !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }

        let mut conn = self.reader.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[from.as_stream_id()], &opts)
            .await?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for id in key.ids {
                let mut fields = HashMap::with_capacity(id.map.len());
                for (name, value) in &id.map {
                    fields.insert(name.clone(), redis::from_redis_value::<String>(value)?);
                }
                entries.push(RawEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize, Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer.clone();
        Ok(conn.xack(stream, group, ids).await?)
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, Error> {
        let mut conn = self.writer.clone();
        Ok(conn.xadd(stream, "*", fields).await?)
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.writer.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

//! Producer side: append routed events for any gateway instance to deliver.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;

use super::entry::{encode_payload, Target, PAYLOAD_FIELD};
use super::log::EventLog;

#[derive(Clone)]
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    stream: String,
}

impl EventPublisher {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>) -> Self {
        Self {
            log,
            stream: stream.into(),
        }
    }

    pub async fn to_user(&self, user_id: i64, event: &str, data: &Value) -> Result<String, Error> {
        self.publish(&Target::User(user_id), event, data).await
    }

    pub async fn to_users(
        &self,
        user_ids: &[i64],
        event: &str,
        data: &Value,
    ) -> Result<String, Error> {
        self.publish(&Target::Users(user_ids.to_vec()), event, data)
            .await
    }

    pub async fn to_room(&self, room: &str, event: &str, data: &Value) -> Result<String, Error> {
        self.publish(&Target::Room(room.to_string()), event, data)
            .await
    }

    pub async fn broadcast(&self, event: &str, data: &Value) -> Result<String, Error> {
        self.publish(&Target::Broadcast, event, data).await
    }

    /// Append one entry and return the id the log assigned to it.
    pub async fn publish(&self, target: &Target, event: &str, data: &Value) -> Result<String, Error> {
        let fields = [(
            PAYLOAD_FIELD.to_string(),
            encode_payload(target, event, data),
        )];
        let id = self.log.append(&self.stream, &fields).await?;
        tracing::debug!(stream = %self.stream, %id, event, "event published");
        Ok(id)
    }
}

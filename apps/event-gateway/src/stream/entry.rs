//! Decoding of log entries into routable events.
//!
//! Producers either write a single `payload` field holding a JSON object, or
//! one field per key. In the flat form structured values (`userIds`, `data`)
//! are JSON-encoded strings; `target`, `roomId`, and `event` are plain.

use serde_json::{Map, Value};

use crate::error::Error;

use super::log::RawEntry;

pub const PAYLOAD_FIELD: &str = "payload";

/// Fields kept verbatim in the flat form, never parsed as JSON.
const PLAIN_FIELDS: [&str; 3] = ["target", "roomId", "event"];

/// Who an entry is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    User(i64),
    Users(Vec<i64>),
    Room(String),
    /// Absent or unrecognized targets fall back to everyone.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub target: Target,
    pub event: String,
    pub data: Value,
}

impl LogEntry {
    pub fn decode(raw: &RawEntry) -> Result<Self, Error> {
        let body = match raw.fields.get(PAYLOAD_FIELD) {
            Some(payload) => match serde_json::from_str::<Value>(payload)? {
                Value::Object(map) => map,
                other => {
                    return Err(Error::Decode(format!(
                        "payload must be a JSON object, got {other}"
                    )))
                }
            },
            None => flat_fields(raw),
        };

        let event = body
            .get("event")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Decode("missing event name".to_string()))?
            .to_string();

        let target = match body.get("target").and_then(Value::as_str) {
            Some("user") => Target::User(
                body.get("userId")
                    .and_then(as_user_id)
                    .ok_or_else(|| Error::Decode("user target without a valid userId".to_string()))?,
            ),
            Some("users") => Target::Users(
                body.get("userIds")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::Decode("users target without userIds".to_string()))?
                    .iter()
                    .map(|id| {
                        as_user_id(id).ok_or_else(|| Error::Decode(format!("invalid user id {id}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some("room") => Target::Room(
                body.get("roomId")
                    .and_then(as_room_id)
                    .ok_or_else(|| Error::Decode("room target without roomId".to_string()))?,
            ),
            _ => Target::Broadcast,
        };

        Ok(Self {
            id: raw.id.clone(),
            target,
            event,
            data: body.get("data").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Encode a routed event as the single-field form accepted by `decode`.
pub fn encode_payload(target: &Target, event: &str, data: &Value) -> String {
    let mut body = Map::new();
    match target {
        Target::User(user_id) => {
            body.insert("target".into(), "user".into());
            body.insert("userId".into(), (*user_id).into());
        }
        Target::Users(user_ids) => {
            body.insert("target".into(), "users".into());
            body.insert("userIds".into(), user_ids.clone().into());
        }
        Target::Room(room) => {
            body.insert("target".into(), "room".into());
            body.insert("roomId".into(), room.clone().into());
        }
        Target::Broadcast => {}
    }
    body.insert("event".into(), event.into());
    body.insert("data".into(), data.clone());
    Value::Object(body).to_string()
}

fn flat_fields(raw: &RawEntry) -> Map<String, Value> {
    raw.fields
        .iter()
        .map(|(key, value)| {
            let parsed = if PLAIN_FIELDS.contains(&key.as_str()) {
                Value::String(value.clone())
            } else {
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()))
            };
            (key.clone(), parsed)
        })
        .collect()
}

/// User ids arrive as numbers or numeric strings.
fn as_user_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_room_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

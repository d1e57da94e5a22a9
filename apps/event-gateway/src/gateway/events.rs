//! Gateway event names, close codes, and wire-format frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::user::SafeUser;

// ---------------------------------------------------------------------------
// Close codes (4000-range for application-level)
// ---------------------------------------------------------------------------

pub const CLOSE_INVALID_FRAME: u16 = 4000;
pub const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_TIMEOUT: u16 = 4009;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Protocol event names. Business events carry whatever name the producer
/// put on the log entry.
pub struct EventName;

impl EventName {
    // Client → server
    pub const AUTHENTICATE: &'static str = "authenticate";
    pub const SUBSCRIBE: &'static str = "subscribe";
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";
    pub const PING: &'static str = "ping";

    // Server → client
    pub const AUTHENTICATED: &'static str = "authenticated";
    pub const UNAUTHENTICATED: &'static str = "unauthenticated";
    pub const SUBSCRIBED: &'static str = "subscribed";
    pub const UNSUBSCRIBED: &'static str = "unsubscribed";
    pub const ALREADY_SUBSCRIBED: &'static str = "already_subscribed";
    pub const NOT_SUBSCRIBED: &'static str = "not_subscribed";
    pub const PONG: &'static str = "pong";
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A named event sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn authenticated(user: &SafeUser) -> Self {
        Self::new(
            EventName::AUTHENTICATED,
            serde_json::json!({
                "message": "Authentication successful",
                "user": user,
            }),
        )
    }

    pub fn unauthenticated(message: &str) -> Self {
        Self::new(
            EventName::UNAUTHENTICATED,
            serde_json::json!({ "message": message }),
        )
    }

    pub fn subscribed(topic: &str) -> Self {
        Self::new(EventName::SUBSCRIBED, serde_json::json!({ "topic": topic }))
    }

    pub fn unsubscribed(topic: &str) -> Self {
        Self::new(EventName::UNSUBSCRIBED, serde_json::json!({ "topic": topic }))
    }

    pub fn already_subscribed(topic: &str) -> Self {
        Self::new(
            EventName::ALREADY_SUBSCRIBED,
            serde_json::json!({
                "message": format!("Already subscribed to {topic}"),
                "topic": topic,
            }),
        )
    }

    pub fn not_subscribed(topic: &str) -> Self {
        Self::new(
            EventName::NOT_SUBSCRIBED,
            serde_json::json!({
                "message": format!("Not subscribed to {topic}"),
                "topic": topic,
            }),
        )
    }

    pub fn pong() -> Self {
        Self::new(EventName::PONG, serde_json::json!({}))
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticatePayload {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TopicPayload {
    pub topic: String,
}

/// A client frame with its payload decoded.
#[derive(Debug)]
pub enum ClientEvent {
    Authenticate(AuthenticatePayload),
    Subscribe(TopicPayload),
    Unsubscribe(TopicPayload),
    Ping,
    Unknown(String),
}

impl ClientFrame {
    pub fn into_event(self) -> Result<ClientEvent, serde_json::Error> {
        let event = match self.event.as_str() {
            EventName::AUTHENTICATE => ClientEvent::Authenticate(payload_or_default(self.data)?),
            EventName::SUBSCRIBE => ClientEvent::Subscribe(serde_json::from_value(self.data)?),
            EventName::UNSUBSCRIBE => ClientEvent::Unsubscribe(serde_json::from_value(self.data)?),
            EventName::PING => ClientEvent::Ping,
            _ => ClientEvent::Unknown(self.event),
        };
        Ok(event)
    }
}

/// A missing `authenticate` payload is an empty token, which fails
/// verification like any other bad token.
fn payload_or_default(data: Value) -> Result<AuthenticatePayload, serde_json::Error> {
    if data.is_null() {
        return Ok(AuthenticatePayload {
            token: String::new(),
        });
    }
    serde_json::from_value(data)
}

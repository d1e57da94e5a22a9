//! Per-connection protocol state.

/// `Connected` → `Authenticated` → `Closed`. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated,
    Closed,
}

/// State for a single WebSocket connection, owned by its connection task.
#[derive(Debug)]
pub struct ConnectionSession {
    /// Transport handle (`conn_` prefixed ULID).
    pub connection_id: String,
    state: ConnectionState,
    user_id: Option<i64>,
}

impl ConnectionSession {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            state: ConnectionState::Connected,
            user_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Returns `false` if the session is already closed.
    pub fn mark_authenticated(&mut self, user_id: i64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ConnectionState::Authenticated;
        self.user_id = Some(user_id);
        true
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

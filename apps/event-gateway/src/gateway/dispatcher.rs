//! Resolves a routing target into live connections and queues the event on
//! each of them.
//!
//! A target with no live connections is not an error: the emit is a no-op
//! and, for single users, reports `false`.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;
use super::sockets::SocketTable;

/// Cloneable handle shared by the gateway and the log consumer.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    sockets: Arc<SocketTable>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, sockets: Arc<SocketTable>) -> Self {
        Self { registry, sockets }
    }

    /// Emit to every connection of one user. `false` if the user has none.
    pub async fn emit_to_user(&self, user_id: i64, event: &str, data: &Value) -> bool {
        let targets = self.registry.connections_for_user(user_id);
        if targets.is_empty() {
            tracing::debug!(user_id, event, "no live connections for user");
            return false;
        }

        let payload = Arc::new(ServerEvent::new(event, data.clone()));
        self.emit_to_connections(targets, payload).await;
        true
    }

    /// Emit to several users at once. Users without connections are skipped;
    /// returns `true` once every user has been attempted.
    pub async fn emit_to_users(&self, user_ids: &[i64], event: &str, data: &Value) -> bool {
        let attempts = user_ids
            .iter()
            .map(|user_id| self.emit_to_user(*user_id, event, data));
        let delivered = join_all(attempts).await;

        tracing::debug!(
            event,
            users = user_ids.len(),
            reached = delivered.iter().filter(|ok| **ok).count(),
            "fan-out to users complete"
        );
        true
    }

    /// Emit to every connection currently joined to `room`.
    pub async fn emit_to_room(&self, room: &str, event: &str, data: &Value) -> bool {
        let members = self.registry.room_members(room);
        if members.is_empty() {
            tracing::debug!(room, event, "room has no members");
            return true;
        }

        let payload = Arc::new(ServerEvent::new(event, data.clone()));
        self.emit_to_connections(members, payload).await;
        true
    }

    /// Emit to every live socket, authenticated or not.
    pub async fn emit_to_all(&self, event: &str, data: &Value) -> bool {
        let payload = Arc::new(ServerEvent::new(event, data.clone()));
        self.emit_to_connections(self.sockets.ids(), payload).await;
        true
    }

    async fn emit_to_connections<I>(&self, connection_ids: I, payload: Arc<ServerEvent>) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let sends = connection_ids.into_iter().map(|connection_id| {
            let payload = payload.clone();
            async move { self.sockets.send(&connection_id, payload).await }
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}

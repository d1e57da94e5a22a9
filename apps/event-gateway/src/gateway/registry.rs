//! Registry of authenticated connections, the user → connections index, and
//! room membership.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::user::SafeUser;

/// An authenticated connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: i64,
    /// Fetched once at authentication; never replaced for this record.
    pub profile: Arc<SafeUser>,
    pub joined_at: DateTime<Utc>,
    /// Topics this connection is currently a member of.
    pub subscriptions: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    UnknownConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotJoined,
    UnknownConnection,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<String, Connection>,
    users: HashMap<i64, HashSet<String>>,
    rooms: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    /// Remove every index entry pointing at `conn`. Empty user and room sets
    /// are dropped.
    fn detach(&mut self, conn: &Connection) {
        if let Some(ids) = self.users.get_mut(&conn.user_id) {
            ids.remove(&conn.connection_id);
            if ids.is_empty() {
                self.users.remove(&conn.user_id);
            }
        }
        for topic in &conn.subscriptions {
            if let Some(members) = self.rooms.get_mut(topic) {
                members.remove(&conn.connection_id);
                if members.is_empty() {
                    self.rooms.remove(topic);
                }
            }
        }
    }
}

/// Shared registry of authenticated connections.
///
/// All three maps live behind one `parking_lot::RwLock`, so a connection is
/// never visible in one index and missing from another.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authenticated connection. A previous record under the same
    /// id is replaced, releasing its user index entry and rooms.
    pub fn register(&self, connection_id: &str, user_id: i64, profile: SafeUser) -> Connection {
        let connection = Connection {
            connection_id: connection_id.to_string(),
            user_id,
            profile: Arc::new(profile),
            joined_at: Utc::now(),
            subscriptions: HashSet::new(),
        };

        let mut state = self.state.write();
        if let Some(previous) = state.connections.remove(connection_id) {
            state.detach(&previous);
        }
        state
            .users
            .entry(user_id)
            .or_default()
            .insert(connection_id.to_string());
        state
            .connections
            .insert(connection_id.to_string(), connection.clone());

        connection
    }

    /// Forget a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, connection_id: &str) -> bool {
        let mut state = self.state.write();
        match state.connections.remove(connection_id) {
            Some(conn) => {
                state.detach(&conn);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.state.read().connections.get(connection_id).cloned()
    }

    pub fn connections_for_user(&self, user_id: i64) -> HashSet<String> {
        self.state
            .read()
            .users
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count_distinct_users(&self) -> usize {
        self.state.read().users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Add `topic` to the connection's subscriptions and the room index.
    pub fn join(&self, connection_id: &str, topic: &str) -> JoinOutcome {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let Some(conn) = state.connections.get_mut(connection_id) else {
            return JoinOutcome::UnknownConnection;
        };
        if !conn.subscriptions.insert(topic.to_string()) {
            return JoinOutcome::AlreadyJoined;
        }
        state
            .rooms
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.to_string());

        JoinOutcome::Joined
    }

    /// Remove `topic` from the connection's subscriptions and the room index.
    pub fn leave(&self, connection_id: &str, topic: &str) -> LeaveOutcome {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let Some(conn) = state.connections.get_mut(connection_id) else {
            return LeaveOutcome::UnknownConnection;
        };
        if !conn.subscriptions.remove(topic) {
            return LeaveOutcome::NotJoined;
        }
        if let Some(members) = state.rooms.get_mut(topic) {
            members.remove(connection_id);
            if members.is_empty() {
                state.rooms.remove(topic);
            }
        }

        LeaveOutcome::Left
    }

    /// Connections currently joined to `topic`.
    pub fn room_members(&self, topic: &str) -> Vec<String> {
        self.state
            .read()
            .rooms
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: i64, role: &str) -> SafeUser {
        SafeUser {
            id,
            username: format!("user{id}"),
            full_name: None,
            role: role.to_string(),
            avatar_url: None,
        }
    }

    fn ids(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_and_get_connection() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register("c1", 42, profile(42, "STUDENT"));
        assert_eq!(conn.user_id, 42);
        assert!(conn.subscriptions.is_empty());

        let fetched = registry.get("c1").unwrap();
        assert_eq!(fetched.user_id, 42);
        assert_eq!(fetched.profile.role, "STUDENT");
        assert!(registry.get("bogus").is_none());
    }

    #[test]
    fn connections_for_user_tracks_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register("a", 7, profile(7, "TEACHER"));
        registry.register("b", 7, profile(7, "TEACHER"));
        registry.register("c", 8, profile(8, "STUDENT"));

        assert_eq!(registry.connections_for_user(7), ids(&["a", "b"]));
        assert_eq!(registry.connections_for_user(8), ids(&["c"]));
        assert_eq!(registry.count_distinct_users(), 2);

        assert!(registry.unregister("a"));
        assert_eq!(registry.connections_for_user(7), ids(&["b"]));
        assert_eq!(registry.count_distinct_users(), 2);

        // Last connection gone → user entry dropped.
        assert!(registry.unregister("b"));
        assert!(registry.connections_for_user(7).is_empty());
        assert_eq!(registry.count_distinct_users(), 1);
        assert!(!registry.state.read().users.contains_key(&7));
    }

    #[test]
    fn unregister_unknown_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister("nope"));
        registry.register("c1", 1, profile(1, "ADMIN"));
        assert!(registry.unregister("c1"));
        assert!(!registry.unregister("c1"));
    }

    #[test]
    fn connections_for_unknown_user_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.connections_for_user(999).is_empty());
    }

    #[test]
    fn join_is_idempotent_and_leave_reports_missing() {
        let registry = ConnectionRegistry::new();
        registry.register("c1", 1, profile(1, "STUDENT"));

        assert_eq!(registry.join("c1", "news"), JoinOutcome::Joined);
        assert_eq!(registry.join("c1", "news"), JoinOutcome::AlreadyJoined);
        assert_eq!(registry.room_members("news"), vec!["c1".to_string()]);
        assert_eq!(registry.get("c1").unwrap().subscriptions, ids(&["news"]));

        assert_eq!(registry.leave("c1", "news"), LeaveOutcome::Left);
        assert_eq!(registry.leave("c1", "news"), LeaveOutcome::NotJoined);
        assert!(registry.room_members("news").is_empty());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn join_and_leave_on_unknown_connection_do_not_mutate() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.join("ghost", "news"), JoinOutcome::UnknownConnection);
        assert_eq!(registry.leave("ghost", "news"), LeaveOutcome::UnknownConnection);
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn unregister_removes_room_membership() {
        let registry = ConnectionRegistry::new();
        registry.register("a", 1, profile(1, "STUDENT"));
        registry.register("b", 2, profile(2, "STUDENT"));
        registry.join("a", "role_STUDENT_room");
        registry.join("b", "role_STUDENT_room");
        registry.join("a", "solo");

        registry.unregister("a");
        assert_eq!(registry.room_members("role_STUDENT_room"), vec!["b".to_string()]);
        assert!(registry.room_members("solo").is_empty());
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn register_replaces_previous_record_for_same_connection() {
        let registry = ConnectionRegistry::new();
        registry.register("c1", 1, profile(1, "STUDENT"));
        registry.join("c1", "role_STUDENT_room");

        let replaced = registry.register("c1", 2, profile(2, "ADMIN"));
        assert_eq!(replaced.user_id, 2);
        assert!(replaced.subscriptions.is_empty());

        assert!(registry.connections_for_user(1).is_empty());
        assert_eq!(registry.connections_for_user(2), ids(&["c1"]));
        assert!(registry.room_members("role_STUDENT_room").is_empty());
        assert_eq!(registry.count_distinct_users(), 1);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn concurrent_devices_of_same_user_keep_index_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let registry = registry.clone();
                scope.spawn(move || {
                    for i in 0..200 {
                        let id = format!("w{worker}-{i}");
                        registry.register(&id, 7, profile(7, "STUDENT"));
                        registry.join(&id, "role_STUDENT_room");
                        if i % 2 == 0 {
                            assert!(registry.unregister(&id));
                        }
                    }
                });
            }
        });

        // Odd iterations stay registered: 8 workers × 100.
        let remaining = registry.connections_for_user(7);
        assert_eq!(remaining.len(), 800);
        assert_eq!(registry.connection_count(), 800);
        assert_eq!(registry.room_members("role_STUDENT_room").len(), 800);
        for id in &remaining {
            assert!(registry.get(id).is_some());
        }

        for id in remaining {
            registry.unregister(&id);
        }
        assert_eq!(registry.count_distinct_users(), 0);
        assert_eq!(registry.room_count(), 0);
    }
}

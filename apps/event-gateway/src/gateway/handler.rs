//! Connection protocol: authenticate, subscribe, unsubscribe, ping, and
//! disconnect handling on top of the registry and socket table.

use std::sync::Arc;

use crate::auth::tokens::TokenVerifier;
use crate::config::GatewayConfig;
use crate::db::users::UserDirectory;

use super::dispatcher::Dispatcher;
use super::events::{
    ClientEvent, ClientFrame, ServerEvent, CLOSE_AUTH_FAILED, CLOSE_INVALID_FRAME,
    CLOSE_NOT_AUTHENTICATED,
};
use super::registry::{ConnectionRegistry, JoinOutcome, LeaveOutcome};
use super::rooms::RoomNaming;
use super::session::{ConnectionSession, ConnectionState};
use super::sockets::{Outbox, SocketTable};

const AUTH_FAILED_MESSAGE: &str = "Authentication failed";
const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";

/// Owns the registry and socket table and runs the per-connection protocol.
pub struct ConnectionGateway {
    registry: Arc<ConnectionRegistry>,
    sockets: Arc<SocketTable>,
    dispatcher: Dispatcher,
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserDirectory>,
    rooms: RoomNaming,
}

impl ConnectionGateway {
    pub fn new(
        config: &GatewayConfig,
        verifier: Arc<dyn TokenVerifier>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let sockets = Arc::new(SocketTable::new(
            config.outbound_buffer,
            config.send_timeout,
        ));
        let dispatcher = Dispatcher::new(registry.clone(), sockets.clone());

        Self {
            registry,
            sockets,
            dispatcher,
            verifier,
            users,
            rooms: RoomNaming::new(config.role_room_template.clone()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn sockets(&self) -> &Arc<SocketTable> {
        &self.sockets
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Accept a transport connection. It starts unauthenticated and is not
    /// in the registry yet.
    pub fn on_connect(&self) -> (ConnectionSession, Outbox) {
        let (connection_id, outbound) = self.sockets.open();
        tracing::debug!(%connection_id, "connection accepted");
        (ConnectionSession::new(connection_id), outbound)
    }

    /// Route one decoded client frame. Frames arriving after close are ignored.
    pub async fn handle_frame(&self, session: &mut ConnectionSession, frame: ClientFrame) {
        if session.is_closed() {
            return;
        }

        let event = match frame.into_event() {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(connection_id = %session.connection_id, %err, "invalid payload");
                self.close(session, CLOSE_INVALID_FRAME, "Invalid payload");
                return;
            }
        };

        match event {
            ClientEvent::Authenticate(payload) => {
                self.authenticate(session, &payload.token).await;
            }
            ClientEvent::Subscribe(payload) => {
                self.subscribe(session, &payload.topic).await;
            }
            ClientEvent::Unsubscribe(payload) => {
                self.unsubscribe(session, &payload.topic).await;
            }
            ClientEvent::Ping => self.ping(session).await,
            ClientEvent::Unknown(name) => {
                tracing::debug!(connection_id = %session.connection_id, event = %name, "ignoring unknown event");
            }
        }
    }

    /// Verify `token`, attach the user's profile, join the role room, and
    /// emit `authenticated`. Any failure emits `unauthenticated` and closes.
    ///
    /// On an already-authenticated connection a successful call replaces the
    /// previous registration, including its subscriptions.
    pub async fn authenticate(&self, session: &mut ConnectionSession, token: &str) -> ConnectionState {
        if session.is_closed() {
            return ConnectionState::Closed;
        }

        let identity = match self.verifier.validate(token).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::debug!(connection_id = %session.connection_id, %err, "token rejected");
                return self.reject(session, CLOSE_AUTH_FAILED, AUTH_FAILED_MESSAGE);
            }
        };

        let profile = match self.users.find_safe_user(identity.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    user_id = identity.user_id,
                    "token refers to unknown user"
                );
                return self.reject(session, CLOSE_AUTH_FAILED, AUTH_FAILED_MESSAGE);
            }
            Err(err) => {
                tracing::error!(
                    connection_id = %session.connection_id,
                    user_id = identity.user_id,
                    %err,
                    "user lookup failed"
                );
                return self.reject(session, CLOSE_AUTH_FAILED, AUTH_FAILED_MESSAGE);
            }
        };

        // The stored profile is the source of truth for the role; the token
        // claim may be stale.
        let role_room = self.rooms.room_for_role(&profile.role);
        let connection = self
            .registry
            .register(&session.connection_id, identity.user_id, profile);
        self.registry.join(&session.connection_id, &role_room);
        session.mark_authenticated(identity.user_id);

        if identity.role != connection.profile.role {
            tracing::debug!(
                connection_id = %session.connection_id,
                token_role = %identity.role,
                profile_role = %connection.profile.role,
                "token role differs from stored profile"
            );
        }
        tracing::info!(
            connection_id = %session.connection_id,
            user_id = identity.user_id,
            role = %connection.profile.role,
            %role_room,
            "connection authenticated"
        );

        self.emit(session, ServerEvent::authenticated(&connection.profile))
            .await;
        session.state()
    }

    /// Join `topic`. Requires authentication.
    pub async fn subscribe(&self, session: &mut ConnectionSession, topic: &str) -> ConnectionState {
        if session.is_closed() {
            return ConnectionState::Closed;
        }

        match self.registry.join(&session.connection_id, topic) {
            JoinOutcome::Joined => {
                tracing::debug!(connection_id = %session.connection_id, topic, "subscribed");
                self.emit(session, ServerEvent::subscribed(topic)).await;
            }
            JoinOutcome::AlreadyJoined => {
                self.emit(session, ServerEvent::already_subscribed(topic))
                    .await;
            }
            JoinOutcome::UnknownConnection => {
                return self.reject(session, CLOSE_NOT_AUTHENTICATED, AUTH_REQUIRED_MESSAGE);
            }
        }
        session.state()
    }

    /// Leave `topic`. Requires authentication.
    pub async fn unsubscribe(&self, session: &mut ConnectionSession, topic: &str) -> ConnectionState {
        if session.is_closed() {
            return ConnectionState::Closed;
        }

        match self.registry.leave(&session.connection_id, topic) {
            LeaveOutcome::Left => {
                tracing::debug!(connection_id = %session.connection_id, topic, "unsubscribed");
                self.emit(session, ServerEvent::unsubscribed(topic)).await;
            }
            LeaveOutcome::NotJoined => {
                self.emit(session, ServerEvent::not_subscribed(topic)).await;
            }
            LeaveOutcome::UnknownConnection => {
                return self.reject(session, CLOSE_NOT_AUTHENTICATED, AUTH_REQUIRED_MESSAGE);
            }
        }
        session.state()
    }

    pub async fn ping(&self, session: &ConnectionSession) {
        self.emit(session, ServerEvent::pong()).await;
    }

    /// Emit `unauthenticated`, then close. A previously authenticated
    /// registration is dropped immediately.
    pub fn reject(&self, session: &mut ConnectionSession, code: u16, message: &str) -> ConnectionState {
        if self.registry.unregister(&session.connection_id) {
            tracing::info!(connection_id = %session.connection_id, "registration revoked");
        }
        let farewell = Arc::new(ServerEvent::unauthenticated(message));
        self.shut(session, code, message, Some(farewell))
    }

    /// Close after any pending events. Does not wait on queue capacity.
    pub fn close(&self, session: &mut ConnectionSession, code: u16, reason: &str) -> ConnectionState {
        self.shut(session, code, reason, None)
    }

    fn shut(
        &self,
        session: &mut ConnectionSession,
        code: u16,
        reason: &str,
        farewell: Option<Arc<ServerEvent>>,
    ) -> ConnectionState {
        if !session.is_closed() {
            if !self
                .sockets
                .close_with(&session.connection_id, code, reason, farewell)
            {
                tracing::debug!(connection_id = %session.connection_id, code, "socket already closing");
            }
            session.mark_closed();
        }
        ConnectionState::Closed
    }

    /// Transport closed. Drops the socket and, if it was authenticated, its
    /// registry entry, user index entry, and room memberships.
    pub fn on_disconnect(&self, session: &mut ConnectionSession) {
        self.sockets.remove(&session.connection_id);
        let was_registered = self.registry.unregister(&session.connection_id);
        session.mark_closed();

        if was_registered {
            tracing::info!(
                connection_id = %session.connection_id,
                user_id = session.user_id(),
                "connection closed"
            );
        } else {
            tracing::debug!(connection_id = %session.connection_id, "unauthenticated connection closed");
        }
    }

    async fn emit(&self, session: &ConnectionSession, event: ServerEvent) {
        self.sockets
            .send(&session.connection_id, Arc::new(event))
            .await;
    }
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use event_gateway::auth::tokens::{AccessClaims, JwtVerifier};
use event_gateway::config::{Config, GatewayConfig, StreamConfig};
use event_gateway::db::users::MemoryUserDirectory;
use event_gateway::models::user::SafeUser;
use event_gateway::stream::{EventPublisher, MemoryEventLog};
use event_gateway::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Mint an HS256 access token the way the backend does.
pub fn mint_token(user_id: i64, role: &str) -> String {
    mint_with_offset(user_id, role, 300)
}

pub fn mint_expired_token(user_id: i64, role: &str) -> String {
    mint_with_offset(user_id, role, -300)
}

fn mint_with_offset(user_id: i64, role: &str, exp_offset_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = AccessClaims {
        sub: user_id,
        role: role.to_string(),
        exp: now + exp_offset_secs,
        iat: Some(now),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// Config with short intervals so tests run quickly. External URLs are
/// never dialed: the event log and user directory are in memory.
pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused/test".to_string(),
        redis_url: "redis://unused:6379/0".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        port: 0,
        stream: StreamConfig {
            key: "test:notifications".to_string(),
            group: "test-group".to_string(),
            consumer: "gateway-test".to_string(),
            batch_size: 10,
            block: Duration::from_millis(100),
            read_backoff: Duration::from_millis(10),
        },
        gateway: GatewayConfig {
            auth_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            ..GatewayConfig::default()
        },
    }
}

/// App state over in-memory collaborators, plus handles to them.
pub struct TestContext {
    pub state: AppState,
    pub log: Arc<MemoryEventLog>,
    pub users: Arc<MemoryUserDirectory>,
    pub cancel: CancellationToken,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let log = Arc::new(MemoryEventLog::new());
        let users = Arc::new(MemoryUserDirectory::new());
        users.insert(test_user(42, "alice", "STUDENT"));
        users.insert(test_user(7, "bob", "TEACHER"));

        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
        let state = AppState::new(config, verifier, users.clone(), log.clone());

        Self {
            state,
            log,
            users,
            cancel: CancellationToken::new(),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher::new(self.log.clone(), self.state.config.stream.key.clone())
    }

    pub fn start_consumer(&self) -> JoinHandle<()> {
        self.state.log_consumer().spawn(self.cancel.clone())
    }

    /// Entries read but not yet acknowledged by the gateway's group.
    pub fn pending(&self) -> usize {
        let stream = &self.state.config.stream;
        self.log.pending_count(&stream.key, &stream.group)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn test_user(id: i64, username: &str, role: &str) -> SafeUser {
    SafeUser {
        id,
        username: username.to_string(),
        full_name: Some(format!("{username} test")),
        role: role.to_string(),
        avatar_url: None,
    }
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background until the test's runtime shuts down.
pub async fn start_server(state: &AppState) -> SocketAddr {
    let app = event_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_event(ws: &mut WsClient, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Next server event as `{event, data}` JSON. Panics on close or timeout.
pub async fn next_event(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse event");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {other:?}"),
        }
    }
}

/// Read until the server's close frame and return its code.
pub async fn expect_close(ws: &mut WsClient) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Close(Some(frame)) => return u16::from(frame.code),
            tungstenite::Message::Close(None) => panic!("close frame without a code"),
            tungstenite::Message::Text(text) => {
                panic!("Expected close frame, got event: {text}")
            }
            _ => continue,
        }
    }
}

/// Connect and authenticate; returns the socket after `authenticated`.
pub async fn connect_as(addr: SocketAddr, user_id: i64, role: &str) -> WsClient {
    let mut ws = connect(addr).await;
    send_event(
        &mut ws,
        "authenticate",
        serde_json::json!({ "token": mint_token(user_id, role) }),
    )
    .await;

    let reply = next_event(&mut ws).await;
    assert_eq!(reply["event"], "authenticated", "unexpected reply: {reply}");
    ws
}

/// Poll until `check` holds, for state updated by the server's tasks.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::config::GatewayConfig;
use crate::AppState;

use super::events::{ClientFrame, CLOSE_INVALID_FRAME, CLOSE_TIMEOUT};
use super::handler::ConnectionGateway;
use super::session::ConnectionSession;
use super::sockets::{Outbound, Outbox};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let gateway = state.gateway.clone();
    let (mut session, outbound) = gateway.on_connect();
    let (ws_tx, ws_rx) = socket.split();

    run_connection(
        &gateway,
        &state.config.gateway,
        &mut session,
        ws_tx,
        ws_rx,
        outbound,
    )
    .await;

    gateway.on_disconnect(&mut session);
}

/// Main connection loop: read client frames, write queued events, and
/// enforce the authentication and idle deadlines.
async fn run_connection(
    gateway: &Arc<ConnectionGateway>,
    config: &GatewayConfig,
    session: &mut ConnectionSession,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut outbound: Outbox,
) {
    let auth_deadline = time::sleep(config.auth_timeout);
    tokio::pin!(auth_deadline);
    let mut auth_deadline_passed = false;

    let mut idle_timer = time::interval(config.idle_timeout);
    idle_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_activity = true;

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        got_activity = true;
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => gateway.handle_frame(session, frame).await,
                            Err(_) => {
                                gateway.close(session, CLOSE_INVALID_FRAME, "Invalid JSON");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        got_activity = true;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Event or close queued for this connection.
            item = outbound.recv() => {
                match item {
                    Some(Outbound::Event(event)) => {
                        let json = match serde_json::to_string(&*event) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(%err, event = %event.event, "failed to serialize event");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = send_close(&mut ws_tx, code, &reason).await;
                        break;
                    }
                    None => break,
                }
            }

            // Unauthenticated connections get a bounded window.
            _ = &mut auth_deadline, if !auth_deadline_passed => {
                auth_deadline_passed = true;
                if !session.is_authenticated() {
                    tracing::debug!(connection_id = %session.connection_id, "authentication timeout");
                    gateway.reject(session, CLOSE_TIMEOUT, "Authentication timeout");
                }
            }

            // Idle timeout check.
            _ = idle_timer.tick() => {
                if !got_activity {
                    tracing::debug!(connection_id = %session.connection_id, "idle timeout, closing connection");
                    gateway.close(session, CLOSE_TIMEOUT, "Idle timeout");
                }
                got_activity = false;
            }
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

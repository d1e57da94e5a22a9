use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway/stats", get(gateway_stats))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GatewayStats {
    /// Open WebSocket connections, authenticated or not.
    pub sockets: usize,
    /// Authenticated connections in the registry.
    pub connections: usize,
    /// Distinct users with at least one authenticated connection.
    pub users: usize,
}

/// `GET /api/v1/gateway/stats` - Live connection counts for this instance.
#[utoipa::path(
    get,
    path = "/api/v1/gateway/stats",
    tag = "Gateway",
    responses(
        (status = 200, description = "Connection counts", body = GatewayStats),
    ),
)]
pub async fn gateway_stats(State(state): State<AppState>) -> Json<GatewayStats> {
    let registry = state.gateway.registry();
    Json(GatewayStats {
        sockets: state.gateway.sockets().len(),
        connections: registry.connection_count(),
        users: registry.count_distinct_users(),
    })
}

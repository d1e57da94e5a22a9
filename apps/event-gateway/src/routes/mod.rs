pub mod health;
pub mod stats;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", stats::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        health::ready,
        // Gateway
        stats::gateway_stats,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            // Models
            crate::models::user::SafeUser,
            // Route response types
            health::HealthResponse,
            stats::GatewayStats,
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Gateway", description = "Real-time gateway status"),
    )
)]
pub struct ApiDoc;

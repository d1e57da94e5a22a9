use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_gateway::auth::tokens::{JwtVerifier, TokenVerifier};
use event_gateway::config::Config;
use event_gateway::db::users::{PgUserDirectory, UserDirectory};
use event_gateway::stream::{EventLog, RedisEventLog};
use event_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // PostgreSQL for user lookups on authenticate.
    let db = event_gateway::db::pool::connect(&config.database_url).await;
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(db));

    // Redis stream the backend publishes events to.
    let event_log: Arc<dyn EventLog> = match RedisEventLog::connect(&config.redis_url).await {
        Ok(log) => Arc::new(log),
        Err(err) => {
            tracing::error!(%err, redis_url = %config.redis_url, "failed to connect to redis");
            std::process::exit(1);
        }
    };

    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret));

    tracing::info!(
        stream = %config.stream.key,
        group = %config.stream.group,
        consumer = %config.stream.consumer,
        "event-gateway configured"
    );

    let state = AppState::new(config, verifier, users, event_log);

    let cancel = CancellationToken::new();
    let consumer = state.log_consumer().spawn(cancel.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(event_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "event-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    cancel.cancel();
    if let Err(err) = consumer.await {
        tracing::error!(%err, "event consumer task failed");
    }
    tracing::info!("event-gateway stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod stream;

use std::sync::Arc;

use auth::tokens::TokenVerifier;
use config::Config;
use db::users::UserDirectory;
use gateway::ConnectionGateway;
use stream::{EventLog, LogConsumer};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<ConnectionGateway>,
    pub event_log: Arc<dyn EventLog>,
}

impl AppState {
    pub fn new(
        config: Config,
        verifier: Arc<dyn TokenVerifier>,
        users: Arc<dyn UserDirectory>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        let gateway = Arc::new(ConnectionGateway::new(&config.gateway, verifier, users));
        Self {
            config: Arc::new(config),
            gateway,
            event_log,
        }
    }

    /// Log consumer wired to this state's dispatcher and stream settings.
    pub fn log_consumer(&self) -> LogConsumer {
        LogConsumer::new(
            self.event_log.clone(),
            self.gateway.dispatcher(),
            self.config.stream.clone(),
        )
    }
}

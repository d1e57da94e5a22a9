use std::str::FromStr;
use std::time::Duration;

use crate::gateway::rooms::DEFAULT_ROLE_ROOM_TEMPLATE;

/// Event gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (user lookup).
    pub database_url: String,
    /// Redis connection string (event stream).
    pub redis_url: String,
    /// HS256 secret shared with the backend that issues access tokens.
    pub jwt_secret: String,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Consumer group settings for the event stream.
    pub stream: StreamConfig,
    /// Per-connection protocol settings.
    pub gateway: GatewayConfig,
}

/// Settings for reading the shared event stream through a consumer group.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream key the backend appends events to.
    pub key: String,
    /// Consumer group name shared by every gateway instance.
    pub group: String,
    /// This process's identity inside the group. Must be the same across
    /// restarts: entries read but not acknowledged are only recovered by the
    /// consumer that read them.
    pub consumer: String,
    /// Maximum entries returned by one group read.
    pub batch_size: usize,
    /// How long a group read waits for new entries.
    pub block: Duration,
    /// Pause after a failed read before trying again.
    pub read_backoff: Duration,
}

/// Consumer identity used when `EVENT_CONSUMER_NAME` is unset.
pub const DEFAULT_CONSUMER_NAME: &str = "gateway-1";

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            key: "notifications:stream".to_string(),
            group: "gateway-group".to_string(),
            consumer: DEFAULT_CONSUMER_NAME.to_string(),
            batch_size: 10,
            block: Duration::from_millis(5000),
            read_backoff: Duration::from_millis(1000),
        }
    }
}

/// Settings for the WebSocket connection protocol.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Room naming template; `{role}` is replaced with the user's role.
    pub role_room_template: String,
    /// Unauthenticated connections are closed after this long.
    pub auth_timeout: Duration,
    /// Connections that send nothing for this long are closed.
    pub idle_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// How long an emit waits on a full outbound queue before dropping.
    pub send_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            role_room_template: DEFAULT_ROLE_ROOM_TEMPLATE.to_string(),
            auth_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            outbound_buffer: 256,
            send_timeout: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(lookup);
        let stream_defaults = StreamConfig::default();
        let gateway_defaults = GatewayConfig::default();

        Self {
            database_url: vars.required("DATABASE_URL"),
            redis_url: vars
                .optional("REDIS_URL")
                .unwrap_or_else(|| "redis://localhost:6379/0".to_string()),
            jwt_secret: vars.required("JWT_SECRET"),
            port: vars.parsed("PORT", 4003),
            stream: StreamConfig {
                key: vars.optional("EVENT_STREAM_KEY").unwrap_or(stream_defaults.key),
                group: vars.optional("EVENT_CONSUMER_GROUP").unwrap_or(stream_defaults.group),
                consumer: vars.optional("EVENT_CONSUMER_NAME").unwrap_or(stream_defaults.consumer),
                batch_size: vars.parsed("EVENT_BATCH_SIZE", stream_defaults.batch_size).max(1),
                block: Duration::from_millis(vars.parsed("EVENT_BLOCK_MS", 5000)),
                read_backoff: Duration::from_millis(vars.parsed("EVENT_READ_BACKOFF_MS", 1000)),
            },
            gateway: GatewayConfig {
                role_room_template: vars
                    .optional("ROLE_ROOM_TEMPLATE")
                    .unwrap_or(gateway_defaults.role_room_template),
                auth_timeout: Duration::from_secs(vars.parsed("AUTH_TIMEOUT_SECS", 30)),
                idle_timeout: Duration::from_secs(vars.parsed("IDLE_TIMEOUT_SECS", 120)),
                outbound_buffer: vars
                    .parsed("OUTBOUND_BUFFER", gateway_defaults.outbound_buffer)
                    .max(1),
                send_timeout: Duration::from_millis(vars.parsed("OUTBOUND_SEND_TIMEOUT_MS", 250)),
            },
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn required(&self, name: &str) -> String {
        (self.0)(name).unwrap_or_else(|| panic!("{name} env var is required"))
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|s| !s.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        (self.0)(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

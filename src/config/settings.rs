//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Redis configuration (backplane)
    pub redis: RedisSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Presence decay thresholds
    pub presence: PresenceSettings,

    /// Connection recovery configuration
    pub recovery: RecoverySettings,

    /// Missed event buffering configuration
    pub missed_events: MissedEventSettings,

    /// Rate limiting configuration
    pub rate_limit: RateLimitSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying tokens
    pub secret: String,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    /// Protects against DoS via oversized messages
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,

    /// Heartbeat ping interval in milliseconds (default: 30000)
    pub heartbeat_interval_ms: u64,

    /// Shutdown drain timeout in milliseconds (default: 5000)
    pub shutdown_timeout_ms: u64,
}

/// Presence decay configuration.
///
/// Two-stage decay (Online -> Away -> Offline) avoids status flapping on
/// brief network blips.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceSettings {
    /// Inactivity age before Online decays to Away (default: 300s)
    pub away_threshold_secs: u64,

    /// Inactivity age before Away decays to Offline (default: 900s)
    pub offline_threshold_secs: u64,

    /// Sweep interval (default: 120s)
    pub sweep_interval_secs: u64,

    /// Absence age after which the presence record is removed (default: 24h)
    pub prune_after_secs: u64,
}

/// Connection recovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySettings {
    /// Grace period before purging cleanly closed sessions (default: 5000ms)
    pub clean_grace_period_ms: u64,

    /// Base delay for the reconnection expiry backoff (default: 5000ms)
    pub backoff_base_ms: u64,

    /// Backoff multiplier per attempt (default: 2.0)
    pub backoff_multiplier: f64,

    /// Ceiling on the backoff delay (default: 60000ms)
    pub backoff_max_delay_ms: u64,

    /// Expiry sweeps allowed before the session is purged (default: 5)
    pub max_reconnect_attempts: u32,
}

/// Missed event buffering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MissedEventSettings {
    /// Queue bound per user; the oldest event is dropped past this (default: 100)
    pub max_per_user: usize,

    /// Retention window; older events are never replayed (default: 600s)
    pub retention_secs: u64,

    /// Retention sweep interval (default: 60s)
    pub sweep_interval_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Per-user short window limit (default: 60/min)
    pub user_events_per_minute: u32,

    /// Per-user long window limit (default: 1000/hr)
    pub user_events_per_hour: u32,

    /// Per-connection limit, bounds a single tab (default: 30/min)
    pub socket_events_per_minute: u32,

    /// Per-IP limit, DDoS defense (default: 200/min)
    pub ip_events_per_minute: u32,

    /// Violations within the tracking window before a block (default: 5)
    pub violation_threshold: u32,

    /// Violation tracking window (default: 600s)
    pub violation_window_secs: u64,

    /// Bucket/violation sweep interval (default: 60s)
    pub sweep_interval_secs: u64,

    /// User ids that bypass all checks
    pub whitelist_users: Vec<i64>,

    /// IP addresses that bypass all checks
    pub whitelist_ips: Vec<String>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 4000)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            // WebSocket settings - security limits to prevent DoS
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("websocket.heartbeat_interval_ms", 30000_i64)?
            .set_default("websocket.shutdown_timeout_ms", 5000_i64)?
            // Presence decay
            .set_default("presence.away_threshold_secs", 300_i64)?
            .set_default("presence.offline_threshold_secs", 900_i64)?
            .set_default("presence.sweep_interval_secs", 120_i64)?
            .set_default("presence.prune_after_secs", 86400_i64)?
            // Connection recovery
            .set_default("recovery.clean_grace_period_ms", 5000_i64)?
            .set_default("recovery.backoff_base_ms", 5000_i64)?
            .set_default("recovery.backoff_multiplier", 2.0)?
            .set_default("recovery.backoff_max_delay_ms", 60000_i64)?
            .set_default("recovery.max_reconnect_attempts", 5_i64)?
            // Missed event buffering
            .set_default("missed_events.max_per_user", 100_i64)?
            .set_default("missed_events.retention_secs", 600_i64)?
            .set_default("missed_events.sweep_interval_secs", 60_i64)?
            // Rate limiting tiers
            .set_default("rate_limit.user_events_per_minute", 60_i64)?
            .set_default("rate_limit.user_events_per_hour", 1000_i64)?
            .set_default("rate_limit.socket_events_per_minute", 30_i64)?
            .set_default("rate_limit.ip_events_per_minute", 200_i64)?
            .set_default("rate_limit.violation_threshold", 5_i64)?
            .set_default("rate_limit.violation_window_secs", 600_i64)?
            .set_default("rate_limit.sweep_interval_secs", 60_i64)?
            .set_default("rate_limit.whitelist_users", Vec::<i64>::new())?
            .set_default("rate_limit.whitelist_ips", Vec::<String>::new())?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=4000 -> server.port = 4000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // Validate JWT secret length for security
                if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
                    return Err(ConfigError::Message(format!(
                        "JWT secret must be at least {} characters for security. Current length: {}",
                        MIN_JWT_SECRET_LENGTH,
                        settings.jwt.secret.len()
                    )));
                }
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid server address configuration")
    }
}

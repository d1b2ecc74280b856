//! Configuration Module
//!
//! Layered configuration loading (files, environment variables).

mod settings;

pub use settings::{
    CorsSettings, JwtSettings, MissedEventSettings, PresenceSettings, RateLimitSettings,
    RecoverySettings, RedisSettings, ServerSettings, Settings, WebSocketSettings,
    MIN_JWT_SECRET_LENGTH,
};

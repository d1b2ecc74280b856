//! Common Test Utilities
//!
//! Shared harness wiring the realtime services against an in-process
//! backplane and static collaborator implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use sync_gateway::config::{
    CorsSettings, JwtSettings, MissedEventSettings, PresenceSettings, RateLimitSettings,
    RecoverySettings, RedisSettings, ServerSettings, Settings, WebSocketSettings,
};
use sync_gateway::domain::{
    AccessResolver, ConnectionId, IdentityVerifier, Room, UserId, VerifiedIdentity,
};
use sync_gateway::infrastructure::LoopbackBackplane;
use sync_gateway::presentation::websocket::{Outbound, ServerFrame};
use sync_gateway::shared::AppError;
use sync_gateway::startup::SyncServices;

/// Settings tuned for fast tests.
pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        redis: RedisSettings {
            url: "redis://localhost:6379".into(),
        },
        jwt: JwtSettings {
            secret: "0123456789abcdef0123456789abcdef".into(),
        },
        websocket: WebSocketSettings {
            max_message_size: 65536,
            max_frame_size: 16384,
            heartbeat_interval_ms: 30000,
            shutdown_timeout_ms: 500,
        },
        presence: PresenceSettings {
            away_threshold_secs: 300,
            offline_threshold_secs: 900,
            sweep_interval_secs: 120,
            prune_after_secs: 86400,
        },
        recovery: RecoverySettings {
            clean_grace_period_ms: 100,
            backoff_base_ms: 50,
            backoff_multiplier: 2.0,
            backoff_max_delay_ms: 400,
            max_reconnect_attempts: 5,
        },
        missed_events: MissedEventSettings {
            max_per_user: 100,
            retention_secs: 600,
            sweep_interval_secs: 60,
        },
        rate_limit: RateLimitSettings {
            user_events_per_minute: 1000,
            user_events_per_hour: 10000,
            socket_events_per_minute: 30,
            ip_events_per_minute: 2000,
            violation_threshold: 5,
            violation_window_secs: 600,
            sweep_interval_secs: 60,
            whitelist_users: vec![],
            whitelist_ips: vec![],
        },
        cors: CorsSettings {
            allowed_origins: vec![],
        },
        environment: "test".into(),
    }
}

/// Access resolver with a fixed answer and a fixed relation set.
pub struct StaticAccess {
    pub allow: bool,
    pub related: Vec<UserId>,
}

#[async_trait]
impl AccessResolver for StaticAccess {
    async fn can_join(&self, _user_id: UserId, _room: &Room) -> Result<bool, AppError> {
        Ok(self.allow)
    }

    async fn related_users(&self, _user_id: UserId) -> Result<Vec<UserId>, AppError> {
        Ok(self.related.clone())
    }
}

/// Identity verifier accepting tokens of the form `token-<user_id>`.
pub struct StaticIdentity;

#[async_trait]
impl IdentityVerifier for StaticIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AppError> {
        let user_id = token
            .strip_prefix("token-")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| AppError::AuthenticationFailure("Bad token".into()))?;
        Ok(VerifiedIdentity {
            user_id,
            display_name: None,
        })
    }
}

/// A registered fake connection observing its outbound queue.
pub struct TestClient {
    pub id: ConnectionId,
    pub user_id: UserId,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    /// Drain every queued frame.
    pub fn frames(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Outbound::Frame(frame) = msg {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain frames, keeping only one event type.
    pub fn frames_of(&mut self, event: &str) -> Vec<ServerFrame> {
        self.frames().into_iter().filter(|f| f.event == event).collect()
    }
}

/// Service harness over a loopback backplane.
pub struct TestHarness {
    pub services: Arc<SyncServices>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings_and_access(
            test_settings(),
            Arc::new(StaticAccess {
                allow: true,
                related: vec![],
            }),
        )
    }

    pub fn with_access(access: Arc<dyn AccessResolver>) -> Self {
        Self::with_settings_and_access(test_settings(), access)
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_settings_and_access(
            settings,
            Arc::new(StaticAccess {
                allow: true,
                related: vec![],
            }),
        )
    }

    pub fn with_settings_and_access(settings: Settings, access: Arc<dyn AccessResolver>) -> Self {
        let services = SyncServices::new(
            Arc::new(settings),
            Arc::new(LoopbackBackplane::new()),
            Arc::new(StaticIdentity),
            access,
        );
        Self { services }
    }

    /// Register a fake connection the way the gateway does on connect:
    /// connection registry, own user room, recovery tracking.
    pub fn connect(&self, user_id: UserId) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.services.connections.register(id, user_id, tx);
        self.services
            .rooms
            .insert_membership(id, user_id, Room::user(user_id));
        self.services.recovery.register(id, user_id);
        TestClient { id, user_id, rx }
    }

    /// Simulate a socket drop with the given reason.
    pub fn disconnect(
        &self,
        client: &TestClient,
        reason: sync_gateway::domain::DisconnectReason,
    ) {
        self.services.connections.unregister(client.id);
        self.services.recovery.on_disconnect(client.id, reason);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

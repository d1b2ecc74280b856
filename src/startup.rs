//! Application Startup
//!
//! Service wiring, shared state, and server initialization.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::application::services::{
    EventBroadcaster, MissedEventStore, PresenceTracker, RateLimiter, RecoveryManager,
    RoomRegistry,
};
use crate::config::Settings;
use crate::domain::{AccessResolver, Backplane, IdentityVerifier, OpenAccessResolver};
use crate::infrastructure::{JwtIdentityVerifier, RedisBackplane};
use crate::presentation::http::routes;
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{ConnectionRegistry, ServerFrame};
use crate::shared::error::AppError;

/// The realtime subsystem: every coordination service plus the shutdown
/// switch, wired once and shared behind an `Arc`.
pub struct SyncServices {
    pub settings: Arc<Settings>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub connections: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub missed: Arc<MissedEventStore>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub presence: Arc<PresenceTracker>,
    pub recovery: Arc<RecoveryManager>,
    pub rate_limiter: Arc<RateLimiter>,
    shutting_down: AtomicBool,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncServices {
    /// Wire the services together with injected collaborators.
    pub fn new(
        settings: Arc<Settings>,
        backplane: Arc<dyn Backplane>,
        identity: Arc<dyn IdentityVerifier>,
        access: Arc<dyn AccessResolver>,
    ) -> Arc<Self> {
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new(Arc::clone(&access)));
        let missed = Arc::new(MissedEventStore::new(&settings.missed_events));
        let broadcaster = Arc::new(EventBroadcaster::new(
            Arc::clone(&connections),
            Arc::clone(&rooms),
            Arc::clone(&missed),
            backplane,
        ));
        let presence = Arc::new(PresenceTracker::new(
            &settings.presence,
            Arc::clone(&broadcaster),
            access,
        ));
        let recovery = Arc::new(RecoveryManager::new(
            settings.recovery.clone(),
            Arc::clone(&rooms),
            Arc::clone(&missed),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));

        Arc::new(Self {
            settings,
            identity,
            connections,
            rooms,
            missed,
            broadcaster,
            presence,
            recovery,
            rate_limiter,
            shutting_down: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start the backplane listener and the periodic sweepers.
    pub async fn start_background(&self) -> Result<(), AppError> {
        let listener = self.broadcaster.start_backplane_listener().await?;
        let mut handles = self.background.lock();
        handles.push(listener);
        handles.push(self.rate_limiter.spawn_sweeper());
        handles.push(self.missed.spawn_sweeper());
        handles.push(self.presence.spawn_sweeper());
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: notify clients, close sockets, cancel timers.
    /// Idempotent; a second call returns immediately.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            connections = self.connections.count(),
            "Shutting down gateway"
        );

        self.connections.broadcast_frame(ServerFrame::server_shutdown());
        self.connections.close_all();

        self.recovery.shutdown();
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }

        // Bounded drain: wait for handler tasks to unregister, give up at
        // the deadline.
        let deadline = Duration::from_millis(self.settings.websocket.shutdown_timeout_ms);
        let drained = tokio::time::timeout(deadline, async {
            while self.connections.count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("Gateway shutdown complete");
        } else {
            tracing::warn!(
                remaining = self.connections.count(),
                "Gateway shutdown timed out with connections still open"
            );
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<SyncServices>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    services: Arc<SyncServices>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);

        // Redis pub/sub backplane for multi-instance fan-out
        let backplane = Arc::new(RedisBackplane::connect(&settings.redis).await?);
        tracing::info!("Backplane connection established");

        let identity = Arc::new(JwtIdentityVerifier::new(&settings.jwt));
        // Default resolver until a membership service is wired in; it
        // allows all joins and fans presence out to nobody.
        let access = Arc::new(OpenAccessResolver);

        let services = SyncServices::new(Arc::clone(&settings), backplane, identity, access);
        services.start_background().await?;

        let state = AppState {
            services: Arc::clone(&services),
        };

        // Build router with middleware
        let router = routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let addr = settings.server.socket_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            services,
        })
    }

    /// Run the server until a shutdown signal arrives, then drain.
    pub async fn run_until_stopped(self) -> Result<()> {
        let services = self.services;
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            services.shutdown().await;
        })
        .await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

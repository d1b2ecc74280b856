//! Connection Recovery Manager
//!
//! Per-connection disconnect state machine:
//! `Connected -> Disconnected(reason) -> {Reconnected | Expired}`.
//!
//! Clean disconnects purge after a short grace period. Other disconnects
//! retain the session (and its room memberships, so the broadcaster keeps
//! capturing misses) and run an exponential-backoff expiry task; once the
//! attempt budget is exhausted the session expires and a failure counter
//! increments. A reconnect within the window migrates memberships to the
//! new connection and replays missed events in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;

use super::missed_events::{MissedEventStore, ReplayedEvents};
use super::room_registry::RoomRegistry;
use crate::config::RecoverySettings;
use crate::domain::{ConnectionId, DisconnectReason, UserId};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Session state retained across a non-clean disconnect.
struct RetainedSession {
    user_id: UserId,
    disconnected_at: DateTime<Utc>,
    reason: DisconnectReason,
    attempts: u32,
    expiry_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct RecoveryManager {
    /// Live connections: Connected phase of the state machine
    active: DashMap<ConnectionId, UserId>,
    /// Disconnected sessions awaiting reconnection or expiry
    retained: DashMap<ConnectionId, RetainedSession>,
    rooms: Arc<RoomRegistry>,
    missed: Arc<MissedEventStore>,
    settings: RecoverySettings,
    failed_recoveries: AtomicU64,
}

impl RecoveryManager {
    pub fn new(
        settings: RecoverySettings,
        rooms: Arc<RoomRegistry>,
        missed: Arc<MissedEventStore>,
    ) -> Self {
        Self {
            active: DashMap::new(),
            retained: DashMap::new(),
            rooms,
            missed,
            settings,
            failed_recoveries: AtomicU64::new(0),
        }
    }

    /// Track a freshly established connection.
    pub fn register(&self, connection_id: ConnectionId, user_id: UserId) {
        self.active.insert(connection_id, user_id);
    }

    /// Whether a session id is retained and awaiting reconnection.
    pub fn is_retained(&self, connection_id: ConnectionId) -> bool {
        self.retained.contains_key(&connection_id)
    }

    /// Sessions that exhausted their reconnection budget.
    pub fn failed_recoveries(&self) -> u64 {
        self.failed_recoveries.load(Ordering::Relaxed)
    }

    /// Run the disconnect transition. A no-op for unknown connections, so
    /// double-closing is safe.
    pub fn on_disconnect(self: &Arc<Self>, connection_id: ConnectionId, reason: DisconnectReason) {
        let Some((_, user_id)) = self.active.remove(&connection_id) else {
            return;
        };

        if reason.retains_state() {
            tracing::info!(
                user_id,
                connection_id = %connection_id,
                ?reason,
                "Session retained for recovery"
            );
            let expiry_task = self.spawn_expiry(connection_id);
            self.retained.insert(
                connection_id,
                RetainedSession {
                    user_id,
                    disconnected_at: Utc::now(),
                    reason,
                    attempts: 0,
                    expiry_task: Some(expiry_task),
                },
            );
        } else {
            // Clean close: keep memberships briefly to absorb in-flight
            // messages, then purge.
            let grace = StdDuration::from_millis(self.settings.clean_grace_period_ms);
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                manager.rooms.leave_all(connection_id);
                metrics::RECOVERY_OUTCOMES_TOTAL
                    .with_label_values(&["purged_clean"])
                    .inc();
                tracing::debug!(connection_id = %connection_id, "Clean session purged");
            });
        }
    }

    /// Reconnect with a prior session id: migrate memberships to the new
    /// connection, reset the attempt counter, and return the ordered
    /// replay split.
    pub fn reconnect(
        &self,
        prior: ConnectionId,
        new_connection: ConnectionId,
        user_id: UserId,
    ) -> Result<ReplayedEvents, AppError> {
        let Some((_, mut session)) = self
            .retained
            .remove_if(&prior, |_, s| s.user_id == user_id)
        else {
            return Err(AppError::UnknownSession(prior.to_string()));
        };

        if let Some(task) = session.expiry_task.take() {
            task.abort();
        }

        self.rooms.migrate(prior, new_connection, user_id);
        let replay = self.missed.drain_split(user_id, session.disconnected_at);

        metrics::RECOVERY_OUTCOMES_TOTAL
            .with_label_values(&["recovered"])
            .inc();
        tracing::info!(
            user_id,
            prior = %prior,
            connection_id = %new_connection,
            since_disconnect = replay.since_disconnect.len(),
            earlier = replay.earlier.len(),
            expiry_sweeps = session.attempts,
            reason = ?session.reason,
            "Session recovered"
        );
        Ok(replay)
    }

    /// Expiry task: sleep with exponential backoff between sweeps; give up
    /// once `attempts` exceeds the budget.
    fn spawn_expiry(self: &Arc<Self>, connection_id: ConnectionId) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                tokio::time::sleep(manager.backoff_delay(attempts)).await;

                // Reconnected sessions are removed from the map; stop.
                let Some(mut session) = manager.retained.get_mut(&connection_id) else {
                    break;
                };
                attempts += 1;
                session.attempts = attempts;
                drop(session);

                if attempts > manager.settings.max_reconnect_attempts {
                    manager.expire(connection_id);
                    break;
                }
            }
        })
    }

    /// Backoff with a 0-10% jitter: `min(base * multiplier^attempts, max)`.
    fn backoff_delay(&self, attempts: u32) -> StdDuration {
        let exponential = self.settings.backoff_base_ms as f64
            * self.settings.backoff_multiplier.powi(attempts as i32);
        let capped = exponential.min(self.settings.backoff_max_delay_ms as f64);
        let jitter = 1.0 + rand::rng().random_range(0.0..0.1);
        StdDuration::from_millis((capped * jitter) as u64)
    }

    /// Purge an expired session: leave its rooms and count the failure.
    fn expire(&self, connection_id: ConnectionId) {
        if let Some((_, session)) = self.retained.remove(&connection_id) {
            self.rooms.leave_all(connection_id);
            self.failed_recoveries.fetch_add(1, Ordering::Relaxed);
            metrics::RECOVERY_OUTCOMES_TOTAL
                .with_label_values(&["expired"])
                .inc();
            tracing::info!(
                user_id = session.user_id,
                connection_id = %connection_id,
                "Session expired after exhausting reconnection backoff"
            );
        }
    }

    /// Abort every pending expiry timer. Part of the shutdown path.
    pub fn shutdown(&self) {
        for mut entry in self.retained.iter_mut() {
            if let Some(task) = entry.expiry_task.take() {
                task.abort();
            }
        }
    }
}

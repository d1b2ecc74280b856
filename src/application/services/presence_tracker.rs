//! Presence Tracker
//!
//! Aggregates per-user online status across all of a user's connections.
//! Status is never computed per-connection. Activity and heartbeats keep a
//! user Online; a periodic sweep decays idle users Online -> Away ->
//! Offline in two stages so brief network blips do not flap status.
//! Presence diffs fan out to the user set supplied by the external
//! membership resolver.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::event_broadcaster::EventBroadcaster;
use crate::config::PresenceSettings;
use crate::domain::{
    AccessResolver, ActivityUpdate, BroadcastTarget, EventPayload, PresenceStatus, UserId,
    UserPresence,
};
use crate::infrastructure::metrics;

pub struct PresenceTracker {
    presences: DashMap<UserId, UserPresence>,
    broadcaster: Arc<EventBroadcaster>,
    access: Arc<dyn AccessResolver>,
    away_threshold: Duration,
    offline_threshold: Duration,
    prune_after: Duration,
    sweep_interval: StdDuration,
}

impl PresenceTracker {
    pub fn new(
        settings: &PresenceSettings,
        broadcaster: Arc<EventBroadcaster>,
        access: Arc<dyn AccessResolver>,
    ) -> Self {
        Self {
            presences: DashMap::new(),
            broadcaster,
            access,
            away_threshold: Duration::seconds(settings.away_threshold_secs as i64),
            offline_threshold: Duration::seconds(settings.offline_threshold_secs as i64),
            prune_after: Duration::seconds(settings.prune_after_secs as i64),
            sweep_interval: StdDuration::from_secs(settings.sweep_interval_secs),
        }
    }

    /// Current aggregated status for a user.
    pub fn status_of(&self, user_id: UserId) -> Option<PresenceStatus> {
        self.presences.get(&user_id).map(|p| p.status)
    }

    /// Record client-reported activity: merge metadata, force Online,
    /// stamp `last_activity`, and broadcast a presence diff.
    pub async fn mark_active(&self, user_id: UserId, update: &ActivityUpdate) {
        self.mark_active_at(user_id, update, Utc::now()).await;
    }

    /// Clock-injected variant of [`mark_active`](Self::mark_active).
    pub async fn mark_active_at(
        &self,
        user_id: UserId,
        update: &ActivityUpdate,
        now: DateTime<Utc>,
    ) {
        // Mutate under the shard lock, broadcast after it is released.
        let (came_online, snapshot) = match self.presences.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                let presence = occupied.get_mut();
                let was = presence.status;
                presence.merge(update);
                presence.status = PresenceStatus::Online;
                presence.last_activity = now;
                (was != PresenceStatus::Online, presence.clone())
            }
            Entry::Vacant(vacant) => {
                let mut presence = UserPresence::new(user_id, now);
                presence.merge(update);
                vacant.insert(presence.clone());
                (true, presence)
            }
        };

        if came_online {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["online"])
                .inc();
            self.broadcast_diff("user:online", snapshot).await;
        } else {
            self.broadcast_diff("user:activity", snapshot).await;
        }
    }

    /// Refresh liveness without an activity broadcast. Driven by connect
    /// and heartbeat pongs; re-asserts Online if decay had downgraded it.
    pub async fn touch(&self, user_id: UserId) {
        self.touch_at(user_id, Utc::now()).await;
    }

    /// Clock-injected variant of [`touch`](Self::touch).
    pub async fn touch_at(&self, user_id: UserId, now: DateTime<Utc>) {
        let came_online = match self.presences.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                let presence = occupied.get_mut();
                let was = presence.status;
                presence.status = PresenceStatus::Online;
                presence.last_activity = now;
                (was != PresenceStatus::Online).then(|| presence.clone())
            }
            Entry::Vacant(vacant) => {
                let presence = UserPresence::new(user_id, now);
                vacant.insert(presence.clone());
                Some(presence)
            }
        };

        if let Some(snapshot) = came_online {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["online"])
                .inc();
            self.broadcast_diff("user:online", snapshot).await;
        }
    }

    /// Explicitly mark a user Away.
    pub async fn mark_away(&self, user_id: UserId) {
        if let Some(snapshot) = self.transition(user_id, PresenceStatus::Away) {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["away"])
                .inc();
            self.broadcast_diff("user:activity", snapshot).await;
        }
    }

    /// Explicitly mark a user Offline.
    pub async fn mark_offline(&self, user_id: UserId) {
        if let Some(snapshot) = self.transition(user_id, PresenceStatus::Offline) {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["offline"])
                .inc();
            self.broadcast_diff("user:offline", snapshot).await;
        }
    }

    /// Set a status if the record exists and differs. Returns a snapshot
    /// when a transition happened.
    fn transition(&self, user_id: UserId, status: PresenceStatus) -> Option<UserPresence> {
        let mut presence = self.presences.get_mut(&user_id)?;
        if presence.status == status {
            return None;
        }
        presence.status = status;
        Some(presence.clone())
    }

    /// Decay idle users and prune long-gone records.
    pub async fn sweep(&self) {
        self.sweep_at(Utc::now()).await;
    }

    /// Clock-injected variant of [`sweep`](Self::sweep).
    pub async fn sweep_at(&self, now: DateTime<Utc>) {
        let mut to_away = Vec::new();
        let mut to_offline = Vec::new();
        let mut to_prune = Vec::new();

        for mut entry in self.presences.iter_mut() {
            let age = now - entry.last_activity;
            match entry.status {
                PresenceStatus::Online if age > self.away_threshold => {
                    entry.status = PresenceStatus::Away;
                    to_away.push(entry.clone());
                }
                PresenceStatus::Away if age > self.offline_threshold => {
                    entry.status = PresenceStatus::Offline;
                    to_offline.push(entry.clone());
                }
                PresenceStatus::Offline if age > self.prune_after => {
                    to_prune.push(entry.user_id);
                }
                _ => {}
            }
        }

        for user_id in to_prune {
            self.presences.remove(&user_id);
            tracing::debug!(user_id, "Pruned absent presence record");
        }
        for snapshot in to_away {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["away"])
                .inc();
            self.broadcast_diff("user:activity", snapshot).await;
        }
        for snapshot in to_offline {
            metrics::PRESENCE_TRANSITIONS_TOTAL
                .with_label_values(&["offline"])
                .inc();
            self.broadcast_diff("user:offline", snapshot).await;
        }
    }

    /// Broadcast a presence diff to the users related to `snapshot`'s user.
    async fn broadcast_diff(&self, event_type: &str, snapshot: UserPresence) {
        let related = match self.access.related_users(snapshot.user_id).await {
            Ok(related) => related,
            Err(e) => {
                tracing::warn!(
                    user_id = snapshot.user_id,
                    error = %e,
                    "Membership lookup failed, presence diff not fanned out"
                );
                return;
            }
        };
        if related.is_empty() {
            return;
        }

        let user_id = snapshot.user_id;
        let diff = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to encode presence diff");
                return;
            }
        };
        self.broadcaster
            .publish(
                EventPayload::new(event_type, diff, Some(user_id)),
                BroadcastTarget::users(related),
            )
            .await;
    }

    /// Spawn the periodic decay sweep task. Aborted on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.sweep().await;
            }
        })
    }
}

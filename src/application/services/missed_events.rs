//! Missed Event Store
//!
//! Bounded per-user queues of events that could not be delivered because
//! the target user had zero active connections. An event leaves the queue
//! on first replay or when the retention sweep expires it, never both.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::MissedEventSettings;
use crate::domain::{EventPayload, MissedEvent, UserId};
use crate::infrastructure::metrics;

pub struct MissedEventStore {
    queues: DashMap<UserId, VecDeque<MissedEvent>>,
    max_per_user: usize,
    retention: Duration,
    sweep_interval: StdDuration,
}

/// Replay split returned on reconnection.
#[derive(Debug, Default)]
pub struct ReplayedEvents {
    /// Events missed at or after the disconnect timestamp, in capture order.
    pub since_disconnect: Vec<EventPayload>,
    /// Older events still within retention (queued while every device was
    /// offline before this session existed).
    pub earlier: Vec<EventPayload>,
}

impl MissedEventStore {
    pub fn new(settings: &MissedEventSettings) -> Self {
        Self {
            queues: DashMap::new(),
            max_per_user: settings.max_per_user,
            retention: Duration::seconds(settings.retention_secs as i64),
            sweep_interval: StdDuration::from_secs(settings.sweep_interval_secs),
        }
    }

    /// Append an event for an offline user. Oldest entries are dropped past
    /// the per-user bound.
    pub fn append(&self, user_id: UserId, event: EventPayload) {
        self.append_at(user_id, event, Utc::now());
    }

    /// Clock-injected variant of [`append`](Self::append).
    pub fn append_at(&self, user_id: UserId, event: EventPayload, now: DateTime<Utc>) {
        let mut queue = self.queues.entry(user_id).or_default();
        if queue.len() >= self.max_per_user {
            queue.pop_front();
            tracing::debug!(user_id, "Missed event queue full, dropped oldest");
        }
        queue.push_back(MissedEvent {
            user_id,
            event,
            missed_at: now,
        });
        metrics::MISSED_EVENTS_QUEUED_TOTAL.inc();
    }

    /// Take every queued event for a user, already filtered by retention.
    /// The queue is emptied; nothing can replay twice.
    pub fn drain(&self, user_id: UserId) -> Vec<EventPayload> {
        self.drain_at(user_id, Utc::now())
    }

    /// Clock-injected variant of [`drain`](Self::drain).
    pub fn drain_at(&self, user_id: UserId, now: DateTime<Utc>) -> Vec<EventPayload> {
        let cutoff = now - self.retention;
        self.queues
            .remove(&user_id)
            .map(|(_, queue)| {
                queue
                    .into_iter()
                    .filter(|m| m.missed_at >= cutoff)
                    .map(|m| m.event)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Take every queued event for a user, split around a disconnect
    /// timestamp. Both halves are retention-filtered and the queue is
    /// emptied.
    pub fn drain_split(&self, user_id: UserId, disconnected_at: DateTime<Utc>) -> ReplayedEvents {
        self.drain_split_at(user_id, disconnected_at, Utc::now())
    }

    /// Clock-injected variant of [`drain_split`](Self::drain_split).
    pub fn drain_split_at(
        &self,
        user_id: UserId,
        disconnected_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ReplayedEvents {
        let cutoff = now - self.retention;
        let mut replay = ReplayedEvents::default();
        let Some((_, queue)) = self.queues.remove(&user_id) else {
            return replay;
        };
        for missed in queue {
            if missed.missed_at < cutoff {
                continue;
            }
            if missed.missed_at >= disconnected_at {
                replay.since_disconnect.push(missed.event);
            } else {
                replay.earlier.push(missed.event);
            }
        }
        replay
    }

    /// Whether a user has queued events.
    pub fn has_events(&self, user_id: UserId) -> bool {
        self.queues
            .get(&user_id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    /// Drop expired events and empty queues.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    /// Clock-injected variant of [`sweep`](Self::sweep).
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.queues.retain(|_, queue| {
            while queue.front().is_some_and(|m| m.missed_at < cutoff) {
                queue.pop_front();
            }
            !queue.is_empty()
        });
    }

    /// Spawn the periodic retention sweep task. Aborted on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

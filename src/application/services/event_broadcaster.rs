//! Event Broadcaster
//!
//! Publishes domain and system events to rooms and users. Local delivery
//! is fire-and-forget over each connection's outbound queue, at most once
//! per connection per publish, in publish order within a room. Every
//! publish is also republished on the distributed backplane so other
//! instances deliver to their own sockets; a backplane failure downgrades
//! to local-only delivery with a warning, never a silent failure.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::missed_events::MissedEventStore;
use super::room_registry::RoomRegistry;
use crate::domain::{Backplane, BroadcastTarget, EventPayload, UserId};
use crate::infrastructure::metrics;
use crate::presentation::websocket::gateway::ConnectionRegistry;
use crate::presentation::websocket::messages::ServerFrame;
use crate::shared::error::AppError;

/// Backplane channel shared by all instances.
pub const BACKPLANE_CHANNEL: &str = "sync:events";

/// Wire envelope for cross-instance republish.
#[derive(Debug, Serialize, Deserialize)]
struct BackplaneEnvelope {
    origin: Uuid,
    event: EventPayload,
    target: BroadcastTarget,
}

pub struct EventBroadcaster {
    /// Distinguishes this process on the backplane so it skips its own
    /// republished events.
    instance_id: Uuid,
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRegistry>,
    missed: Arc<MissedEventStore>,
    backplane: Arc<dyn Backplane>,
}

impl EventBroadcaster {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRegistry>,
        missed: Arc<MissedEventStore>,
        backplane: Arc<dyn Backplane>,
    ) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            connections,
            rooms,
            missed,
            backplane,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Publish an event to a target.
    ///
    /// Delivers to local connections, captures misses for fully offline
    /// users, and republishes on the backplane for other instances.
    pub async fn publish(&self, event: EventPayload, target: BroadcastTarget) {
        metrics::EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[target_label(&target)])
            .inc();

        self.deliver_local(&event, &target, true);

        let envelope = BackplaneEnvelope {
            origin: self.instance_id,
            event,
            target,
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => {
                if let Err(e) = self.backplane.publish(BACKPLANE_CHANNEL, &payload).await {
                    // Reduced guarantee: remote instances will not see this
                    // event; local subscribers already have it.
                    tracing::warn!(
                        event_id = %envelope.event.id,
                        error = %e,
                        "Backplane unreachable, delivered local-only"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode backplane envelope");
            }
        }
    }

    /// Deliver to connections on this instance. `capture_misses` is set
    /// only on the origin instance so a fully offline user is queued once
    /// across the fleet.
    fn deliver_local(&self, event: &EventPayload, target: &BroadcastTarget, capture_misses: bool) {
        let frame = ServerFrame::from_event(event);
        match target {
            BroadcastTarget::User { user_id } => {
                self.deliver_to_user(*user_id, event, frame, capture_misses);
            }
            BroadcastTarget::Users { user_ids } => {
                for user_id in user_ids {
                    self.deliver_to_user(*user_id, event, frame.clone(), capture_misses);
                }
            }
            BroadcastTarget::Room { room } => {
                let members = self.rooms.members_of(room);
                let mut delivered_users: HashSet<UserId> = HashSet::new();
                for (connection_id, user_id) in &members {
                    if self.connections.send_frame(*connection_id, frame.clone()) {
                        delivered_users.insert(*user_id);
                        metrics::EVENTS_DELIVERED_TOTAL.inc();
                    }
                }
                if capture_misses {
                    let member_users: HashSet<UserId> =
                        members.iter().map(|(_, u)| *u).collect();
                    for user_id in member_users {
                        if !delivered_users.contains(&user_id)
                            && !self.connections.user_online(user_id)
                        {
                            self.missed.append(user_id, event.clone());
                        }
                    }
                }
            }
            BroadcastTarget::All => {
                let sent = self.connections.broadcast_frame(frame);
                metrics::EVENTS_DELIVERED_TOTAL.inc_by(sent as u64);
            }
        }
    }

    fn deliver_to_user(
        &self,
        user_id: UserId,
        event: &EventPayload,
        frame: ServerFrame,
        capture_misses: bool,
    ) {
        let sent = self.connections.send_to_user(user_id, frame);
        if sent > 0 {
            metrics::EVENTS_DELIVERED_TOTAL.inc_by(sent as u64);
        } else if capture_misses {
            self.missed.append(user_id, event.clone());
        }
    }

    /// Subscribe to the backplane and re-emit remote events to local
    /// sockets. Returns the listener task handle; abort it on shutdown.
    pub async fn start_backplane_listener(
        self: &Arc<Self>,
    ) -> Result<tokio::task::JoinHandle<()>, AppError> {
        let mut rx = self.backplane.subscribe(BACKPLANE_CHANNEL).await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match serde_json::from_str::<BackplaneEnvelope>(&payload) {
                    Ok(envelope) if envelope.origin == this.instance_id => continue,
                    Ok(envelope) => {
                        this.deliver_local(&envelope.event, &envelope.target, false);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable backplane envelope");
                    }
                }
            }
            tracing::info!("Backplane listener stopped");
        }))
    }
}

fn target_label(target: &BroadcastTarget) -> &'static str {
    match target {
        BroadcastTarget::User { .. } => "user",
        BroadcastTarget::Users { .. } => "users",
        BroadcastTarget::Room { .. } => "room",
        BroadcastTarget::All => "all",
    }
}

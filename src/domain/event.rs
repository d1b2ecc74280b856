//! Broadcast event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::connection::UserId;
use super::room::Room;

/// Unit of broadcast. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl EventPayload {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        from_user_id: Option<UserId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            from_user_id,
            timestamp: Utc::now(),
        }
    }
}

/// Where a publish is addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastTarget {
    User { user_id: UserId },
    Users { user_ids: Vec<UserId> },
    Room { room: Room },
    All,
}

impl BroadcastTarget {
    pub fn user(user_id: UserId) -> Self {
        Self::User { user_id }
    }

    pub fn users(user_ids: Vec<UserId>) -> Self {
        Self::Users { user_ids }
    }

    pub fn room(room: Room) -> Self {
        Self::Room { room }
    }
}

/// An event captured for later delivery because its target user had no
/// active connection at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedEvent {
    pub user_id: UserId,
    pub event: EventPayload,
    pub missed_at: DateTime<Utc>,
}

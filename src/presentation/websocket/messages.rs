//! WebSocket Frame Types
//!
//! Inbound frames are `{event, data}` with a closed event vocabulary;
//! outbound frames reuse the same envelope with dynamic event names for
//! domain events.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::services::rate_limiter::RateLimitExceeded;
use crate::domain::{ActivityUpdate, ConnectionId, EventPayload, Room, RoomType, UserId};

/// Incoming client frame
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Activity(ActivityUpdate),
    Subscribe { room_type: RoomType, room_id: i64 },
    Unsubscribe { room_type: RoomType, room_id: i64 },
    Ping,
    Pong,
    ReconnectRequest { session_id: ConnectionId },
    RequestMissedEvents,
}

/// Outgoing server frame: `{event, data}`
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ServerFrame {
    fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data: Some(data),
        }
    }

    /// Ack sent once after successful authentication.
    pub fn established(
        connection_id: ConnectionId,
        user_id: UserId,
        heartbeat_interval_ms: u64,
    ) -> Self {
        Self::new(
            "connection:established",
            json!({
                "connection_id": connection_id,
                "user_id": user_id,
                "heartbeat_interval_ms": heartbeat_interval_ms,
            }),
        )
    }

    /// Domain or presence event dispatch. The frame's event name is the
    /// payload's type (e.g. `task:updated`).
    pub fn from_event(event: &EventPayload) -> Self {
        Self::new(
            event.event_type.clone(),
            json!({
                "id": event.id,
                "data": event.data,
                "from_user_id": event.from_user_id,
                "timestamp": event.timestamp,
            }),
        )
    }

    pub fn pong() -> Self {
        Self {
            event: "pong".into(),
            data: None,
        }
    }

    pub fn subscription_confirmed(room: &Room) -> Self {
        Self::new("subscription:confirmed", json!({ "room": room }))
    }

    pub fn subscription_denied(room: &Room) -> Self {
        Self::new("subscription:denied", json!({ "room": room }))
    }

    pub fn subscription_removed(room: &Room) -> Self {
        Self::new("subscription:removed", json!({ "room": room }))
    }

    pub fn rate_limit_exceeded(refusal: &RateLimitExceeded) -> Self {
        Self::new(
            "rate_limit_exceeded",
            json!({
                "reason": refusal.reason,
                "retry_after_secs": refusal.retry_after_secs,
                "limit": refusal.limit,
            }),
        )
    }

    /// Queued events delivered on request or as the older half of a replay.
    pub fn missed_events(events: &[EventPayload]) -> Self {
        Self::new("missed_events", json!({ "events": events }))
    }

    /// Events captured since a recovered session's disconnect timestamp.
    pub fn missed_events_since_disconnect(events: &[EventPayload]) -> Self {
        Self::new("missed_events_since_disconnect", json!({ "events": events }))
    }

    pub fn server_shutdown() -> Self {
        Self {
            event: "server_shutdown".into(),
            data: None,
        }
    }

    /// Client-safe error frame. `code` comes from `AppError::client_code`,
    /// never from internal error text.
    pub fn error(code: &str) -> Self {
        Self::new("error", json!({ "code": code }))
    }
}

/// Message queued to a socket's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Protocol-level heartbeat ping
    Ping,
    /// Close the socket and stop the writer
    Close,
}

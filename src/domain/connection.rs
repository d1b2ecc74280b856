//! Connection identity and lifecycle types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User identifier, assigned by the identity service.
pub type UserId = i64;

/// Connection identifier, unique per socket.
pub type ConnectionId = Uuid;

/// Socket liveness as seen by the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Responding to heartbeats
    Connected,
    /// Missed one heartbeat; one more round-trip allowed
    Stale,
    /// Socket closed
    Disconnected,
}

/// Why a connection ended.
///
/// Only `Clean` skips the recovery retention path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Explicit client close (logout)
    Clean,
    /// Abrupt stream end or transport error
    TransportClose,
    /// Heartbeat timeout
    Timeout,
    /// Server shutting down
    ServerShutdown,
}

impl DisconnectReason {
    /// Whether session state should be retained for reconnection.
    pub fn retains_state(&self) -> bool {
        !matches!(self, DisconnectReason::Clean | DisconnectReason::ServerShutdown)
    }
}

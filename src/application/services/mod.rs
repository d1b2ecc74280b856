//! Core Synchronization Services
//!
//! The realtime subsystem's coordination layer: rate limiting, room
//! membership, missed-event buffering, broadcasting, presence, and
//! connection recovery.

pub mod event_broadcaster;
pub mod missed_events;
pub mod presence_tracker;
pub mod rate_limiter;
pub mod recovery_manager;
pub mod room_registry;

pub use event_broadcaster::{EventBroadcaster, BACKPLANE_CHANNEL};
pub use missed_events::{MissedEventStore, ReplayedEvents};
pub use presence_tracker::PresenceTracker;
pub use rate_limiter::{LimitTier, RateLimitExceeded, RateLimiter, RequestContext};
pub use recovery_manager::RecoveryManager;
pub use room_registry::RoomRegistry;

//! Domain Layer
//!
//! Core value types and the collaborator contracts the gateway depends on.

pub mod collaborators;
pub mod connection;
pub mod event;
pub mod presence;
pub mod room;

pub use collaborators::{
    AccessResolver, Backplane, IdentityVerifier, OpenAccessResolver, VerifiedIdentity,
};
pub use connection::{ConnectionId, ConnectionStatus, DisconnectReason, UserId};
pub use event::{BroadcastTarget, EventPayload, MissedEvent};
pub use presence::{ActivityUpdate, PresenceStatus, UserPresence};
pub use room::{Room, RoomType};

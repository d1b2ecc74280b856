//! External collaborator contracts.
//!
//! The gateway core delegates identity verification, room authorization,
//! membership lookups, and cross-instance transport to these traits.
//! Implementations are injected at startup.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::UserId;
use super::room::Room;
use crate::shared::error::AppError;

/// Identity established for a connection, valid for its lifetime.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

/// Verifies a bearer token. Called exactly once per connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AppError>;
}

/// Resolves room access and presence fan-out targets.
///
/// `related_users` backs the presence tracker's "relevant users" set;
/// an empty result means nobody is notified.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// Whether `user_id` may subscribe to `room`.
    async fn can_join(&self, user_id: UserId, room: &Room) -> Result<bool, AppError>;

    /// Users who should see `user_id`'s presence changes (teammates,
    /// shared-project members).
    async fn related_users(&self, user_id: UserId) -> Result<Vec<UserId>, AppError>;
}

/// Distributed publish/subscribe transport for multi-instance fan-out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publish a payload on a channel. Fire-and-forget semantics; errors
    /// surface so the caller can fall back to local-only delivery.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError>;

    /// Subscribe to a channel. Messages arrive on the returned receiver
    /// until the backplane or receiver is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, AppError>;
}

/// Allow-all resolver for local development and single-tenant deployments.
///
/// Returns no related users, so presence diffs are not fanned out until a
/// real membership service is wired in.
pub struct OpenAccessResolver;

#[async_trait]
impl AccessResolver for OpenAccessResolver {
    async fn can_join(&self, _user_id: UserId, _room: &Room) -> Result<bool, AppError> {
        Ok(true)
    }

    async fn related_users(&self, _user_id: UserId) -> Result<Vec<UserId>, AppError> {
        Ok(Vec::new())
    }
}

//! Infrastructure Layer
//!
//! Concrete implementations of the collaborator contracts plus
//! observability plumbing.

pub mod auth;
pub mod backplane;
pub mod metrics;

pub use auth::JwtIdentityVerifier;
pub use backplane::{create_redis_client, LoopbackBackplane, RedisBackplane};

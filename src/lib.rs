//! # Sync Gateway Library
//!
//! Real-time synchronization gateway for a voice-enabled task management
//! platform:
//! - WebSocket gateway fanning out domain events to connected clients
//! - Per-user presence aggregation with two-stage idle decay
//! - Missed-event buffering and replay across disconnects
//! - Multi-tier rate limiting with violation escalation
//! - Redis pub/sub backplane for multi-instance delivery
//!
//! ## Module Structure
//!
//! ```text
//! sync_gateway/
//! +-- config/        Configuration management
//! +-- domain/        Core value types and collaborator contracts
//! +-- application/   Coordination services (rooms, presence, recovery, ...)
//! +-- infrastructure/ Backplane, auth, and metrics implementations
//! +-- presentation/  HTTP routes and the WebSocket gateway
//! +-- shared/        Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Domain layer - core types and contracts
pub mod domain;

// Application layer - coordination services
pub mod application;

// Infrastructure layer - external implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;

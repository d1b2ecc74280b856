//! WebSocket Gateway
//!
//! Connection registry, frame types, per-socket session state, and the
//! upgrade/connection handler.

pub mod gateway;
pub mod handler;
pub mod messages;
pub mod session;

pub use gateway::{ConnectedClient, ConnectionRegistry};
pub use handler::ws_handler;
pub use messages::{ClientFrame, Outbound, ServerFrame};
pub use session::SessionState;

//! Connection Registry
//!
//! Tracks every live socket and its outbound queue. One user may own many
//! concurrent connections (multi-device/tab); the registry keeps a user
//! index for user-addressed delivery and presence checks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::messages::{Outbound, ServerFrame};
use crate::domain::{ConnectionId, UserId};
use crate::infrastructure::metrics;

/// Live connection handle.
pub struct ConnectedClient {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectedClient {
    /// Queue a message to the socket writer. Fire-and-forget; a false
    /// return means the writer is gone.
    pub fn send(&self, message: Outbound) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// All live connections on this instance.
pub struct ConnectionRegistry {
    clients: DashMap<ConnectionId, Arc<ConnectedClient>>,
    user_connections: DashMap<UserId, Vec<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    /// Register a freshly authenticated connection.
    pub fn register(
        &self,
        id: ConnectionId,
        user_id: UserId,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<ConnectedClient> {
        let client = Arc::new(ConnectedClient {
            id,
            user_id,
            connected_at: Utc::now(),
            sender,
        });
        self.clients.insert(id, Arc::clone(&client));
        self.user_connections.entry(user_id).or_default().push(id);
        metrics::CONNECTIONS_ACTIVE.set(self.clients.len() as i64);
        tracing::info!(user_id, connection_id = %id, "Connection registered");
        client
    }

    /// Remove a connection. A no-op when already removed.
    pub fn unregister(&self, id: ConnectionId) {
        if let Some((_, client)) = self.clients.remove(&id) {
            if let Some(mut conns) = self.user_connections.get_mut(&client.user_id) {
                conns.retain(|c| *c != id);
                if conns.is_empty() {
                    drop(conns);
                    self.user_connections
                        .remove_if(&client.user_id, |_, c| c.is_empty());
                }
            }
            metrics::CONNECTIONS_ACTIVE.set(self.clients.len() as i64);
            tracing::info!(
                user_id = client.user_id,
                connection_id = %id,
                "Connection unregistered"
            );
        }
    }

    /// Send a frame to one connection.
    pub fn send_frame(&self, id: ConnectionId, frame: ServerFrame) -> bool {
        self.clients
            .get(&id)
            .map(|c| c.send(Outbound::Frame(frame)))
            .unwrap_or(false)
    }

    /// Send a frame to every connection of a user. Returns the number of
    /// connections reached.
    pub fn send_to_user(&self, user_id: UserId, frame: ServerFrame) -> usize {
        let conns = self.connections_of(user_id);
        let mut sent = 0;
        for id in conns {
            if self.send_frame(id, frame.clone()) {
                sent += 1;
            }
        }
        sent
    }

    /// Send a frame to every connection on this instance.
    pub fn broadcast_frame(&self, frame: ServerFrame) -> usize {
        let mut sent = 0;
        for client in self.clients.iter() {
            if client.send(Outbound::Frame(frame.clone())) {
                sent += 1;
            }
        }
        sent
    }

    /// Ask every socket writer to close.
    pub fn close_all(&self) {
        for client in self.clients.iter() {
            let _ = client.send(Outbound::Close);
        }
    }

    /// Whether a user has at least one live connection.
    pub fn user_online(&self, user_id: UserId) -> bool {
        self.user_connections
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Connection ids of a user's live sockets.
    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.user_connections
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

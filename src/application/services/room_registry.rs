//! Room Registry
//!
//! Membership bookkeeping for logical channels. Joins are gated by the
//! external authorization resolver; membership is bidirectional
//! (room -> connections, connection -> rooms). Reads clone the member set
//! out of the shard so writers are never blocked past a short critical
//! section.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::{AccessResolver, ConnectionId, Room, UserId};
use crate::shared::error::AppError;

pub struct RoomRegistry {
    /// Room -> member connections with their owning users
    rooms: DashMap<Room, HashMap<ConnectionId, UserId>>,
    /// Connection -> joined rooms
    memberships: DashMap<ConnectionId, HashSet<Room>>,
    access: Arc<dyn AccessResolver>,
}

impl RoomRegistry {
    pub fn new(access: Arc<dyn AccessResolver>) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            access,
        }
    }

    /// Join a connection to a room after an authorization check.
    ///
    /// The resolver call completes before any map is touched, so no lock
    /// spans the await. Denial returns `AuthorizationDenied`; the
    /// connection stays open.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        room: Room,
    ) -> Result<(), AppError> {
        let allowed = self.access.can_join(user_id, &room).await?;
        if !allowed {
            return Err(AppError::AuthorizationDenied(room.to_string()));
        }
        self.insert_membership(connection_id, user_id, room);
        Ok(())
    }

    /// Add membership without an authorization check.
    ///
    /// Used for a connection's own user room and for recovery migration,
    /// where access was already established.
    pub fn insert_membership(&self, connection_id: ConnectionId, user_id: UserId, room: Room) {
        self.rooms
            .entry(room)
            .or_default()
            .insert(connection_id, user_id);
        self.memberships
            .entry(connection_id)
            .or_default()
            .insert(room);
        tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");
    }

    /// Remove one membership.
    pub fn leave(&self, connection_id: ConnectionId, room: &Room) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
        if let Some(mut rooms) = self.memberships.get_mut(&connection_id) {
            rooms.remove(room);
        }
        tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
    }

    /// Remove a connection from every room it joined. Returns the rooms it
    /// was a member of.
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<Room> {
        let rooms: Vec<Room> = self
            .memberships
            .remove(&connection_id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    drop(members);
                    self.rooms.remove_if(room, |_, m| m.is_empty());
                }
            }
        }
        rooms
    }

    /// Current members of a room as (connection, user) pairs.
    pub fn members_of(&self, room: &Room) -> Vec<(ConnectionId, UserId)> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|(c, u)| (*c, *u)).collect())
            .unwrap_or_default()
    }

    /// Distinct users with membership in a room.
    pub fn member_users(&self, room: &Room) -> HashSet<UserId> {
        self.rooms
            .get(room)
            .map(|members| members.values().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection has joined.
    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<Room> {
        self.memberships
            .get(&connection_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Move all memberships from a retained connection to its successor.
    /// Skips re-authorization; access was established on the original join.
    pub fn migrate(
        &self,
        from: ConnectionId,
        to: ConnectionId,
        user_id: UserId,
    ) -> Vec<Room> {
        let rooms = self.leave_all(from);
        for room in &rooms {
            self.insert_membership(to, user_id, *room);
        }
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::MockAccessResolver;
    use crate::domain::OpenAccessResolver;
    use uuid::Uuid;

    fn open_registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(OpenAccessResolver))
    }

    #[tokio::test]
    async fn join_adds_bidirectional_membership() {
        let registry = open_registry();
        let conn = Uuid::new_v4();

        registry.join(conn, 1, Room::project(42)).await.unwrap();

        assert_eq!(registry.members_of(&Room::project(42)), vec![(conn, 1)]);
        assert_eq!(registry.rooms_of(conn), vec![Room::project(42)]);
    }

    #[tokio::test]
    async fn denied_join_leaves_no_membership() {
        let mut access = MockAccessResolver::new();
        access.expect_can_join().returning(|_, _| Ok(false));
        let registry = RoomRegistry::new(Arc::new(access));
        let conn = Uuid::new_v4();

        let err = registry.join(conn, 1, Room::project(42)).await.unwrap_err();
        assert_eq!(err.client_code(), "authorization_denied");
        assert!(registry.members_of(&Room::project(42)).is_empty());
        assert!(registry.rooms_of(conn).is_empty());
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let registry = open_registry();
        let conn = Uuid::new_v4();
        registry.join(conn, 1, Room::project(1)).await.unwrap();
        registry.join(conn, 1, Room::task(2)).await.unwrap();

        let mut left = registry.leave_all(conn);
        left.sort_by_key(|r| r.to_string());

        assert_eq!(left.len(), 2);
        assert!(registry.members_of(&Room::project(1)).is_empty());
        assert!(registry.members_of(&Room::task(2)).is_empty());
    }

    #[tokio::test]
    async fn migrate_moves_memberships_to_successor() {
        let registry = open_registry();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        registry.join(old, 1, Room::project(42)).await.unwrap();
        registry.join(old, 1, Room::user(1)).await.unwrap();

        let migrated = registry.migrate(old, new, 1);

        assert_eq!(migrated.len(), 2);
        assert!(registry.rooms_of(old).is_empty());
        let members = registry.members_of(&Room::project(42));
        assert_eq!(members, vec![(new, 1)]);
    }

    #[tokio::test]
    async fn member_users_deduplicates_multi_device_users() {
        let registry = open_registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.join(a, 1, Room::team(3)).await.unwrap();
        registry.join(b, 1, Room::team(3)).await.unwrap();

        assert_eq!(registry.member_users(&Room::team(3)).len(), 1);
    }
}

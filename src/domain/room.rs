//! Room identity.
//!
//! A room is a logical channel grouping subscribers by entity association.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::connection::UserId;

/// Entity kind a room is keyed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    User,
    Project,
    Task,
    Team,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::User => "user",
            RoomType::Project => "project",
            RoomType::Task => "task",
            RoomType::Team => "team",
        }
    }
}

/// Room key: type plus entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "type")]
    pub kind: RoomType,
    pub id: i64,
}

impl Room {
    pub fn new(kind: RoomType, id: i64) -> Self {
        Self { kind, id }
    }

    /// The private room every user is joined to on connect.
    pub fn user(user_id: UserId) -> Self {
        Self {
            kind: RoomType::User,
            id: user_id,
        }
    }

    pub fn project(id: i64) -> Self {
        Self {
            kind: RoomType::Project,
            id,
        }
    }

    pub fn task(id: i64) -> Self {
        Self {
            kind: RoomType::Task,
            id,
        }
    }

    pub fn team(id: i64) -> Self {
        Self {
            kind: RoomType::Team,
            id,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

//! User presence.
//!
//! One record per user, aggregated over all of the user's connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::UserId;

/// Aggregated online status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Per-user presence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

impl UserPresence {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Online,
            last_activity: now,
            current_page: None,
            active_task_id: None,
            active_project_id: None,
            custom_data: None,
        }
    }

    /// Merge an activity update into the record. Absent fields keep their
    /// previous values.
    pub fn merge(&mut self, update: &ActivityUpdate) {
        if let Some(page) = &update.current_page {
            self.current_page = Some(page.clone());
        }
        if let Some(task_id) = update.active_task_id {
            self.active_task_id = Some(task_id);
        }
        if let Some(project_id) = update.active_project_id {
            self.active_project_id = Some(project_id);
        }
        if let Some(data) = &update.custom_data {
            self.custom_data = Some(data.clone());
        }
    }
}

/// Client-reported activity metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityUpdate {
    #[serde(default)]
    pub current_page: Option<String>,
    #[serde(default)]
    pub active_task_id: Option<i64>,
    #[serde(default)]
    pub active_project_id: Option<i64>,
    #[serde(default)]
    pub custom_data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_absent_fields() {
        let mut presence = UserPresence::new(1, Utc::now());
        presence.merge(&ActivityUpdate {
            current_page: Some("/tasks".into()),
            active_task_id: Some(10),
            ..Default::default()
        });
        presence.merge(&ActivityUpdate {
            active_project_id: Some(5),
            ..Default::default()
        });

        assert_eq!(presence.current_page.as_deref(), Some("/tasks"));
        assert_eq!(presence.active_task_id, Some(10));
        assert_eq!(presence.active_project_id, Some(5));
    }
}

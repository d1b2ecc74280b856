//! Presence aggregation and decay scenarios.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use sync_gateway::domain::{ActivityUpdate, PresenceStatus};

use crate::common::{StaticAccess, TestHarness};

#[tokio::test]
async fn connected_users_are_online() {
    let harness = TestHarness::new();
    let _alice = harness.connect(1);
    harness.services.presence.touch(1).await;

    assert_eq!(
        harness.services.presence.status_of(1),
        Some(PresenceStatus::Online)
    );
}

#[tokio::test]
async fn decay_broadcasts_exactly_two_presence_changes() {
    // Scenario D: after the away threshold one broadcast (Online -> Away),
    // after the offline threshold a second (Away -> Offline), and no more.
    let harness = TestHarness::with_access(Arc::new(StaticAccess {
        allow: true,
        related: vec![99],
    }));
    let mut watcher = harness.connect(99);
    let start = Utc::now();

    harness
        .services
        .presence
        .mark_active_at(1, &ActivityUpdate::default(), start)
        .await;
    let _ = watcher.frames(); // drop the user:online diff

    harness
        .services
        .presence
        .sweep_at(start + Duration::seconds(301))
        .await;
    harness
        .services
        .presence
        .sweep_at(start + Duration::seconds(600))
        .await;
    harness
        .services
        .presence
        .sweep_at(start + Duration::seconds(901))
        .await;
    harness
        .services
        .presence
        .sweep_at(start + Duration::seconds(1200))
        .await;

    let events: Vec<String> = watcher.frames().into_iter().map(|f| f.event).collect();
    assert_eq!(events, vec!["user:activity", "user:offline"]);
    assert_eq!(
        harness.services.presence.status_of(1),
        Some(PresenceStatus::Offline)
    );
}

#[tokio::test]
async fn presence_is_aggregated_not_per_connection() {
    let harness = TestHarness::new();
    let _laptop = harness.connect(1);
    let _phone = harness.connect(1);
    harness.services.presence.touch(1).await;

    // One record, one status, regardless of connection count.
    assert_eq!(
        harness.services.presence.status_of(1),
        Some(PresenceStatus::Online)
    );
}

#[tokio::test]
async fn presence_diffs_reach_related_users_only() {
    let harness = TestHarness::with_access(Arc::new(StaticAccess {
        allow: true,
        related: vec![99],
    }));
    let mut watcher = harness.connect(99);
    let mut stranger = harness.connect(50);

    harness
        .services
        .presence
        .mark_active(1, &ActivityUpdate::default())
        .await;

    assert_eq!(watcher.frames_of("user:online").len(), 1);
    assert!(stranger.frames_of("user:online").is_empty());
}

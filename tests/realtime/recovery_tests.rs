//! Disconnect, missed-event capture, and reconnection replay.

use pretty_assertions::assert_eq;
use serde_json::json;

use sync_gateway::domain::{BroadcastTarget, DisconnectReason, EventPayload, Room};

use crate::common::{test_settings, TestHarness};

#[tokio::test]
async fn missed_events_replay_in_order_after_reconnect() {
    // Scenario B: alice disconnects (transport close); three task:updated
    // events fire for project:42; alice reconnects and receives exactly
    // those three, in order, and her missed-event store empties.
    let harness = TestHarness::new();
    let alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();

    harness.disconnect(&alice, DisconnectReason::TransportClose);

    for n in 0..3 {
        harness
            .services
            .broadcaster
            .publish(
                EventPayload::new("task:updated", json!({ "n": n }), Some(2)),
                BroadcastTarget::room(Room::project(42)),
            )
            .await;
    }

    let alice2 = harness.connect(1);
    let replay = harness
        .services
        .recovery
        .reconnect(alice.id, alice2.id, 1)
        .unwrap();

    let ns: Vec<i64> = replay
        .since_disconnect
        .iter()
        .map(|e| e.data["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![0, 1, 2]);
    assert!(replay.earlier.is_empty());
    assert!(!harness.services.missed.has_events(1));

    // The new connection took over the room membership.
    let members = harness.services.rooms.members_of(&Room::project(42));
    assert_eq!(members, vec![(alice2.id, 1)]);
}

#[tokio::test]
async fn replayed_events_are_not_delivered_twice() {
    let harness = TestHarness::new();
    let alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();
    harness.disconnect(&alice, DisconnectReason::TransportClose);

    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("task:updated", json!({}), Some(2)),
            BroadcastTarget::room(Room::project(42)),
        )
        .await;

    let alice2 = harness.connect(1);
    let replay = harness
        .services
        .recovery
        .reconnect(alice.id, alice2.id, 1)
        .unwrap();
    assert_eq!(replay.since_disconnect.len(), 1);

    // A second recovery attempt has nothing: the session is gone and the
    // store is empty.
    let alice3 = harness.connect(1);
    assert!(harness
        .services
        .recovery
        .reconnect(alice.id, alice3.id, 1)
        .is_err());
    assert!(!harness.services.missed.has_events(1));
}

#[tokio::test]
async fn events_past_retention_are_dropped_from_replay() {
    let mut settings = test_settings();
    settings.missed_events.retention_secs = 0;
    let harness = TestHarness::with_settings(settings);
    let alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();
    harness.disconnect(&alice, DisconnectReason::TransportClose);

    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("task:updated", json!({}), Some(2)),
            BroadcastTarget::room(Room::project(42)),
        )
        .await;

    // Zero retention: everything captured is already expired.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let alice2 = harness.connect(1);
    let replay = harness
        .services
        .recovery
        .reconnect(alice.id, alice2.id, 1)
        .unwrap();
    assert!(replay.since_disconnect.is_empty());
    assert!(replay.earlier.is_empty());
}

#[tokio::test(start_paused = true)]
async fn clean_disconnect_does_not_retain_a_session() {
    let harness = TestHarness::new();
    let alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();

    harness.disconnect(&alice, DisconnectReason::Clean);
    assert!(!harness.services.recovery.is_retained(alice.id));

    // After the grace period the memberships are gone too.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(harness
        .services
        .rooms
        .members_of(&Room::project(42))
        .is_empty());

    let alice2 = harness.connect(1);
    assert!(harness
        .services
        .recovery
        .reconnect(alice.id, alice2.id, 1)
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_expires_the_session() {
    let harness = TestHarness::new();
    let alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();
    harness.disconnect(&alice, DisconnectReason::Timeout);
    assert!(harness.services.recovery.is_retained(alice.id));

    // Backoff: 50, 100, 200, 400, 400, 400ms (plus jitter) then expiry.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    assert!(!harness.services.recovery.is_retained(alice.id));
    assert_eq!(harness.services.recovery.failed_recoveries(), 1);
    assert!(harness
        .services
        .rooms
        .members_of(&Room::project(42))
        .is_empty());
}

#[tokio::test]
async fn request_missed_events_drains_the_queue() {
    let harness = TestHarness::new();
    // No connection at all: a user-targeted publish queues globally.
    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("notification:sent", json!({ "text": "hi" }), None),
            BroadcastTarget::user(1),
        )
        .await;
    assert!(harness.services.missed.has_events(1));

    let drained = harness.services.missed.drain(1);
    assert_eq!(drained.len(), 1);
    assert!(!harness.services.missed.has_events(1));
}

//! Room fan-out and delivery semantics.

use pretty_assertions::assert_eq;
use serde_json::json;

use sync_gateway::domain::{BroadcastTarget, EventPayload, Room};

use crate::common::TestHarness;

#[tokio::test]
async fn room_member_receives_published_event_exactly_once() {
    // Scenario A: alice joins project:42; bob (a member) publishes
    // task:updated; alice receives exactly one copy with the payload id.
    let harness = TestHarness::new();
    let mut alice = harness.connect(1);
    let bob = harness.connect(2);

    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();
    harness
        .services
        .rooms
        .join(bob.id, 2, Room::project(42))
        .await
        .unwrap();

    let event = EventPayload::new("task:updated", json!({ "task_id": 7 }), Some(2));
    let event_id = event.id;
    harness
        .services
        .broadcaster
        .publish(event, BroadcastTarget::room(Room::project(42)))
        .await;

    let received = alice.frames_of("task:updated");
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].data.as_ref().unwrap()["id"],
        json!(event_id.to_string())
    );
}

#[tokio::test]
async fn room_events_arrive_in_publish_order() {
    let harness = TestHarness::new();
    let mut alice = harness.connect(1);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();

    for n in 0..10 {
        harness
            .services
            .broadcaster
            .publish(
                EventPayload::new("task:updated", json!({ "n": n }), Some(2)),
                BroadcastTarget::room(Room::project(42)),
            )
            .await;
    }

    let ns: Vec<i64> = alice
        .frames_of("task:updated")
        .iter()
        .map(|f| f.data.as_ref().unwrap()["data"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, (0..10).collect::<Vec<i64>>());
}

#[tokio::test]
async fn non_members_receive_nothing() {
    let harness = TestHarness::new();
    let mut alice = harness.connect(1);
    let mut mallory = harness.connect(3);
    harness
        .services
        .rooms
        .join(alice.id, 1, Room::project(42))
        .await
        .unwrap();

    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("task:updated", json!({}), Some(2)),
            BroadcastTarget::room(Room::project(42)),
        )
        .await;

    assert_eq!(alice.frames_of("task:updated").len(), 1);
    assert!(mallory.frames_of("task:updated").is_empty());
}

#[tokio::test]
async fn every_device_of_a_user_is_reached() {
    let harness = TestHarness::new();
    let mut laptop = harness.connect(1);
    let mut phone = harness.connect(1);

    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("notification:sent", json!({ "text": "hi" }), None),
            BroadcastTarget::user(1),
        )
        .await;

    assert_eq!(laptop.frames_of("notification:sent").len(), 1);
    assert_eq!(phone.frames_of("notification:sent").len(), 1);
}

#[tokio::test]
async fn publish_to_all_reaches_every_connection() {
    let harness = TestHarness::new();
    let mut a = harness.connect(1);
    let mut b = harness.connect(2);

    harness
        .services
        .broadcaster
        .publish(
            EventPayload::new("notification:sent", json!({}), None),
            BroadcastTarget::All,
        )
        .await;

    assert_eq!(a.frames_of("notification:sent").len(), 1);
    assert_eq!(b.frames_of("notification:sent").len(), 1);
}

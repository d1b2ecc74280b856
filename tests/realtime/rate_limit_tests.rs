//! Multi-tier throttling scenarios.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use sync_gateway::application::services::RequestContext;

use crate::common::{test_settings, TestHarness};

fn ctx(user_id: i64) -> RequestContext {
    RequestContext {
        user_id,
        connection_id: Uuid::new_v4(),
        ip: Some("198.51.100.4".parse().unwrap()),
    }
}

#[tokio::test]
async fn socket_limit_rejects_from_the_thirty_first_event() {
    // Scenario C: one socket sends 61 activity events in a minute with a
    // socket cap of 30; events 31..=61 are refused as
    // `socket_limit_exceeded`.
    let harness = TestHarness::new();
    let limiter = &harness.services.rate_limiter;
    let ctx = ctx(1);

    let mut refusals = Vec::new();
    for _ in 0..61 {
        if let Err(refusal) = limiter.check(&ctx) {
            refusals.push(refusal);
        }
    }

    assert_eq!(refusals.len(), 31);
    assert!(refusals.iter().all(|r| r.reason == "socket_limit_exceeded"));
    assert!(refusals.iter().all(|r| r.retry_after_secs <= 60));
}

#[tokio::test]
async fn user_limit_applies_across_connections() {
    let mut settings = test_settings();
    settings.rate_limit.user_events_per_minute = 5;
    settings.rate_limit.socket_events_per_minute = 1000;
    let harness = TestHarness::with_settings(settings);
    let limiter = &harness.services.rate_limiter;

    // Two sockets, one user: the user window is shared.
    let a = ctx(1);
    let b = ctx(1);
    for _ in 0..3 {
        limiter.check(&a).unwrap();
    }
    limiter.check(&b).unwrap();
    limiter.check(&b).unwrap();

    let refusal = limiter.check(&b).unwrap_err();
    assert_eq!(refusal.reason, "user_limit_exceeded");
}

#[tokio::test]
async fn repeated_violations_escalate_to_a_block() {
    let mut settings = test_settings();
    settings.rate_limit.socket_events_per_minute = 0;
    let harness = TestHarness::with_settings(settings);
    let limiter = &harness.services.rate_limiter;
    let ctx = ctx(1);

    // Five breached windows reach the violation threshold and block the
    // socket for at least a minute.
    let mut now = Utc::now();
    for _ in 0..5 {
        let refusal = limiter.check_at(&ctx, now).unwrap_err();
        assert_eq!(refusal.reason, "socket_limit_exceeded");
        now += Duration::seconds(61);
    }

    let refusal = limiter.check_at(&ctx, now - Duration::seconds(60)).unwrap_err();
    assert_eq!(refusal.reason, "temporarily_blocked");
    assert!(refusal.retry_after_secs >= 58);
    assert!(refusal.retry_after_secs <= 60);
}

#[tokio::test]
async fn whitelisted_user_is_never_throttled() {
    let mut settings = test_settings();
    settings.rate_limit.socket_events_per_minute = 0;
    settings.rate_limit.whitelist_users = vec![1];
    let harness = TestHarness::with_settings(settings);

    for _ in 0..200 {
        harness.services.rate_limiter.check(&ctx(1)).unwrap();
    }
}

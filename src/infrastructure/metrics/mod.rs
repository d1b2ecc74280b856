//! Prometheus Metrics Module
//!
//! Provides gateway-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauge
//! - Published/delivered event counters
//! - Missed event queue counters
//! - Rate limit rejection counters by tier
//! - Presence transition counters
//! - Recovery outcome counters

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connections_active", "Number of active WebSocket connections")
            .namespace("sync_gateway"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Published events by target kind ("user", "users", "room", "all")
pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_published_total", "Total events published").namespace("sync_gateway"),
        &["target"],
    )
    .expect("Failed to create EVENTS_PUBLISHED_TOTAL metric")
});

/// Frames delivered to local sockets
pub static EVENTS_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("events_delivered_total", "Total events delivered to local connections")
            .namespace("sync_gateway"),
    )
    .expect("Failed to create EVENTS_DELIVERED_TOTAL metric")
});

/// Events queued for offline users
pub static MISSED_EVENTS_QUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("missed_events_queued_total", "Total events queued for offline users")
            .namespace("sync_gateway"),
    )
    .expect("Failed to create MISSED_EVENTS_QUEUED_TOTAL metric")
});

/// Rate limit rejections by tier reason
pub static RATE_LIMIT_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rate_limit_rejections_total", "Total rate limited operations")
            .namespace("sync_gateway"),
        &["reason"],
    )
    .expect("Failed to create RATE_LIMIT_REJECTIONS_TOTAL metric")
});

/// Presence transitions by edge ("online", "away", "offline")
pub static PRESENCE_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("presence_transitions_total", "Total presence status transitions")
            .namespace("sync_gateway"),
        &["to"],
    )
    .expect("Failed to create PRESENCE_TRANSITIONS_TOTAL metric")
});

/// Recovery outcomes ("recovered", "expired", "purged_clean")
pub static RECOVERY_OUTCOMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("recovery_outcomes_total", "Total recovery session outcomes")
            .namespace("sync_gateway"),
        &["outcome"],
    )
    .expect("Failed to create RECOVERY_OUTCOMES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))
        .expect("Failed to register EVENTS_PUBLISHED_TOTAL");
    registry
        .register(Box::new(EVENTS_DELIVERED_TOTAL.clone()))
        .expect("Failed to register EVENTS_DELIVERED_TOTAL");
    registry
        .register(Box::new(MISSED_EVENTS_QUEUED_TOTAL.clone()))
        .expect("Failed to register MISSED_EVENTS_QUEUED_TOTAL");
    registry
        .register(Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone()))
        .expect("Failed to register RATE_LIMIT_REJECTIONS_TOTAL");
    registry
        .register(Box::new(PRESENCE_TRANSITIONS_TOTAL.clone()))
        .expect("Failed to register PRESENCE_TRANSITIONS_TOTAL");
    registry
        .register(Box::new(RECOVERY_OUTCOMES_TOTAL.clone()))
        .expect("Failed to register RECOVERY_OUTCOMES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

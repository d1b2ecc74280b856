//! HTTP surface: health probes and metrics.

use axum_test::TestServer;

use sync_gateway::presentation::http::routes;
use sync_gateway::startup::AppState;

use crate::common::TestHarness;

fn server(harness: &TestHarness) -> TestServer {
    let router = routes::create_router(AppState {
        services: harness.services.clone(),
    });
    TestServer::new(router).expect("test server")
}

#[tokio::test]
async fn health_reports_ok_and_connection_count() {
    let harness = TestHarness::new();
    let _client = harness.connect(1);
    let server = server(&harness);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn liveness_is_always_alive() {
    let harness = TestHarness::new();
    let server = server(&harness);

    let response = server.get("/health/live").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn readiness_flips_to_draining_on_shutdown() {
    let harness = TestHarness::new();
    let server = server(&harness);

    server.get("/health/ready").await.assert_status_ok();

    harness.services.shutdown().await;
    let response = server.get("/health/ready").await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_exposes_gateway_namespace() {
    let harness = TestHarness::new();
    let server = server(&harness);

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    assert!(response.text().contains("sync_gateway"));
}

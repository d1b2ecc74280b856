//! HTTP Handlers
//!
//! Health and readiness endpoints for orchestration probes.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::startup::AppState;

/// Overall health summary.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "environment": state.services.settings.environment,
        "connections": state.services.connections.count(),
    }))
}

/// Liveness probe: the process is running.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// Readiness probe: refuses traffic once shutdown has begun.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.services.is_shutting_down() {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "draining" })),
        )
            .into_response()
    } else {
        Json(json!({ "status": "ready" })).into_response()
    }
}

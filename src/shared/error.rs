//! Application Error Types
//!
//! Centralized error handling with Axum integration and client-safe
//! WebSocket error codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Backplane unavailable: {0}")]
    BackplaneUnavailable(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Stable, client-safe error code for WebSocket error frames.
    ///
    /// Never exposes internal identifiers or backend details.
    pub fn client_code(&self) -> &'static str {
        match self {
            AppError::AuthenticationFailure(_) => "authentication_failure",
            AppError::AuthorizationDenied(_) => "authorization_denied",
            AppError::BackplaneUnavailable(_) => "backplane_unavailable",
            AppError::RateLimited { .. } => "rate_limit_exceeded",
            AppError::MalformedFrame(_) => "malformed_frame",
            AppError::UnknownSession(_) => "unknown_session",
            AppError::Internal(_) | AppError::Redis(_) | AppError::Serialization(_) => {
                "internal_error"
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::AuthenticationFailure(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::AuthorizationDenied(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limited, retry after {}s", retry_after_secs),
            ),
            AppError::MalformedFrame(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnknownSession(_) => (StatusCode::NOT_FOUND, "Unknown session".into()),
            AppError::BackplaneUnavailable(msg) => {
                tracing::error!("Backplane unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Service degraded".into())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        let body = ErrorResponse {
            code: self.client_code(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_codes_leak_no_internals() {
        let err = AppError::Internal("pool exhausted at 10.0.0.3:5432".into());
        assert_eq!(err.client_code(), "internal_error");

        let err = AppError::Redis(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(err.client_code(), "internal_error");
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = AppError::RateLimited { retry_after_secs: 42 };
        assert_eq!(err.client_code(), "rate_limit_exceeded");
        assert!(err.to_string().contains("42"));
    }
}

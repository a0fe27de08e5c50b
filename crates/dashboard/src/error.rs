//! Dashboard error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Dashboard error type.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Backend query or RPC error.
    #[error("Backend error: {0}")]
    Backend(#[from] external_services::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or malformed configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown aggregation period.
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Unknown toplist sort key.
    #[error("Invalid sort key: {0}")]
    InvalidSortKey(String),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,
}

impl DashboardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DashboardError::InvalidPeriod(_)
            | DashboardError::InvalidSortKey(_)
            | DashboardError::Json(_) => StatusCode::BAD_REQUEST,
            DashboardError::Backend(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Config(_) | DashboardError::ChannelSend => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable code sent to WebSocket clients.
    pub fn code(&self) -> &'static str {
        match self {
            DashboardError::InvalidPeriod(_) => "INVALID_PERIOD",
            DashboardError::InvalidSortKey(_) => "INVALID_SORT",
            DashboardError::Json(_) => "INVALID_MESSAGE",
            DashboardError::Backend(_) => "BACKEND_ERROR",
            _ => "PROCESSING_ERROR",
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "code": self.code() })),
        )
            .into_response()
    }
}

/// Result type for dashboard operations.
pub type Result<T> = std::result::Result<T, DashboardError>;

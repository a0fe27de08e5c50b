//! Error types for the storefront.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Backend error: {0}")]
    Backend(#[from] external_services::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested quantity exceeds what is in stock.
    #[error("Only {available} item(s) available in stock.")]
    InsufficientStock { available: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Page switched off in site settings.
    #[error("{0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InsufficientStock { .. } => StatusCode::CONFLICT,
            Error::Validation(_) | Error::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) | Error::Unavailable(_) => StatusCode::NOT_FOUND,
            Error::Backend(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_message_and_status() {
        let err = Error::InsufficientStock { available: 2 };
        assert_eq!(err.to_string(), "Only 2 item(s) available in stock.");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("Title is required".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::Backend(external_services::Error::Api("boom".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(Error::NotFound("p1".into()).status_code(), StatusCode::NOT_FOUND);
    }
}

//! REST API errors.
//!
//! Every error renders as the standard response envelope with
//! `success: false` and the matching HTTP status.

use crate::models::ApiResponse;
use crate::storage::MemoryStorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::{BrokerError, UserError, ValidationError};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// API errors with associated HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400).
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found (404).
    #[error("{0}")]
    NotFound(String),

    /// Resource already exists (409).
    #[error("{0}")]
    Conflict(String),

    /// Server is shutting down (503).
    #[error("{0}")]
    Unavailable(String),

    /// Internal server error (500).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Human-readable description of an HTTP status code.
#[must_use]
pub fn status_description(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown Status")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ApiResponse::failure(
            self.to_string(),
            Some(json!({ "description": status_description(status.as_u16()) })),
        );
        (status, Json(body)).into_response()
    }
}

impl From<MemoryStorageError> for ApiError {
    fn from(err: MemoryStorageError) -> Self {
        match err {
            MemoryStorageError::NotFound(_) => ApiError::NotFound(err.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(format!("Validation failed: {err}"))
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::InvalidName | UserError::InvalidId | UserError::InvalidEmail => {
                ApiError::BadRequest(format!("Validation failed: {err}"))
            }
            UserError::DuplicateId(_) => ApiError::Conflict(err.to_string()),
            UserError::NotFound(_) => ApiError::NotFound(err.to_string()),
            UserError::ShuttingDown => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::ShuttingDown | BrokerError::QueueFull => {
                ApiError::Unavailable(err.to_string())
            }
            BrokerError::AlreadyRunning | BrokerError::Internal(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_description() {
        assert_eq!(status_description(200), "OK");
        assert_eq!(status_description(404), "Not Found");
        assert_eq!(status_description(599), "Unknown Status");
    }

    #[test]
    fn test_user_error_mapping() {
        assert_eq!(
            ApiError::from(UserError::InvalidEmail).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UserError::DuplicateId("1".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(UserError::NotFound("1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(BrokerError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

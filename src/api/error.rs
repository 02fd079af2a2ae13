//! API error types with HTTP status mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

/// API error type with HTTP status code mapping.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (404).
    NotFound(String),
    /// Conflict - wrong assignment or invalid VM state (409).
    Conflict(String),
    /// Bad request - invalid input or status transition (400).
    BadRequest(String),
    /// Request timeout (408).
    Timeout,
    /// Internal server error (500).
    Internal(String),
}

impl ApiError {
    /// Convert any displayable error to an internal API error.
    pub fn internal(err: impl Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Internal(msg) => f.write_str(msg),
            ApiError::Timeout => f.write_str("request timed out"),
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "TIMEOUT",
                "request timed out".to_string(),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(err: crate::error::Error) -> Self {
        use crate::error::Error;
        match &err {
            Error::SessionHostNotFound { .. } => ApiError::NotFound(err.to_string()),
            Error::InvalidTransition { .. } | Error::InvalidStartInfo(_) => {
                ApiError::BadRequest(err.to_string())
            }
            Error::AssignmentConflict { .. } | Error::InvalidState { .. } => {
                ApiError::Conflict(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::state::SessionHostStatus;

    #[test]
    fn test_api_error_status_codes() {
        let cases = [
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Timeout, StatusCode::REQUEST_TIMEOUT),
            (
                ApiError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_error_mapping() {
        let err = Error::InvalidTransition {
            session_host_id: "h".into(),
            from: SessionHostStatus::StandingBy,
            to: SessionHostStatus::Initializing,
        };
        assert!(matches!(ApiError::from(err), ApiError::BadRequest(_)));

        let err = Error::session_host_not_found("h");
        assert!(matches!(ApiError::from(err), ApiError::NotFound(_)));

        let err = Error::AssignmentConflict {
            current: "a:b:c".into(),
            requested: "x:y:z".into(),
        };
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));

        let err = Error::invalid_state("ServersRemoved", "Running");
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));

        let err = Error::persistence("write", "disk full");
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
    }
}

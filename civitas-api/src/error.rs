//! HTTP error type for civitas-api
//!
//! Every handler returns `ApiResult<T>`; domain errors from civitas-common
//! convert into the matching HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use civitas_common::api::ErrorResponse;
use tracing::error;

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Field-level validation failure (400 with details)
    #[error("Validation failed")]
    Validation(civitas_common::ValidationErrors),

    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but lacking the required role (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. duplicate email or illegal status transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream gateway failure (502)
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<civitas_common::Error> for ApiError {
    fn from(err: civitas_common::Error) -> Self {
        use civitas_common::Error as E;

        if err.is_unique_violation() {
            return ApiError::Conflict("Resource already exists".to_string());
        }

        match err {
            E::NotFound(msg) => ApiError::NotFound(msg),
            E::InvalidInput(msg) => ApiError::BadRequest(msg),
            E::Validation(errors) => ApiError::Validation(errors),
            E::Conflict(msg) => ApiError::Conflict(msg),
            E::Unauthorized(msg) => ApiError::Unauthorized(msg),
            E::Forbidden(msg) => ApiError::Forbidden(msg),
            E::Gateway(msg) => ApiError::BadGateway(msg),
            E::Database(e) => ApiError::Internal(format!("Database error: {}", e)),
            E::Io(e) => ApiError::Internal(format!("IO error: {}", e)),
            E::Config(msg) | E::Storage(msg) | E::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        civitas_common::Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new("NOT_FOUND", msg)),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new("BAD_REQUEST", msg))
            }
            ApiError::Validation(errors) => {
                let details = serde_json::to_value(&errors).unwrap_or_default();
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("VALIDATION_FAILED", errors.to_string(), details),
                )
            }
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorResponse::new("UNAUTHORIZED", msg))
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorResponse::new("FORBIDDEN", msg)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse::new("CONFLICT", msg)),
            ApiError::BadGateway(msg) => {
                (StatusCode::BAD_GATEWAY, ErrorResponse::new("BAD_GATEWAY", msg))
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("INTERNAL_ERROR", "Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

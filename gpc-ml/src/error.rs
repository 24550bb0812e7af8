//! Error types for gpc-ml's HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. reprocessing a unit that is still running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// gpc-common error
    #[error("Common error: {0}")]
    Common(#[from] gpc_common::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(id) => ApiError::NotFound(format!("Image unit {}", id)),
            e @ (PipelineError::AlreadyDispatched { .. } | PipelineError::NotTerminal { .. }) => {
                ApiError::Conflict(e.to_string())
            }
            PipelineError::Database(e) => ApiError::Common(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
            }
            ApiError::Common(gpc_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(gpc_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

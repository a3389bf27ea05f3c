//! API error types.

use crate::metrics::record_upload_error;
use crate::sessions::SessionError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Chunk indices still missing, for `incomplete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<u64>>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("session conflict: {0}")]
    SessionConflict(String),

    #[error("session failed: {0}")]
    SessionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upload incomplete: {} chunks missing", missing.len())]
    Incomplete { missing: Vec<u64> },

    #[error("assembly failed: {0}")]
    AssemblyError(String),

    #[error("storage error: {0}")]
    Storage(#[from] parcel_storage::StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidChunk(_) => "invalid_chunk",
            Self::SessionConflict(_) => "session_conflict",
            Self::SessionFailed(_) => "session_failed",
            Self::NotFound(_) => "not_found",
            Self::Incomplete { .. } => "incomplete",
            Self::AssemblyError(_) => "assembly_error",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidChunk(_) => StatusCode::BAD_REQUEST,
            Self::SessionConflict(_) | Self::Incomplete { .. } => StatusCode::CONFLICT,
            Self::SessionFailed(_) => StatusCode::GONE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AssemblyError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            SessionError::InvalidChunk(msg) => Self::InvalidChunk(msg),
            e @ SessionError::SessionConflict { .. } => Self::SessionConflict(e.to_string()),
            SessionError::SessionFailed(msg) => Self::SessionFailed(msg),
            SessionError::NotFound(msg) => Self::NotFound(msg),
            SessionError::Incomplete { missing } => Self::Incomplete { missing },
            SessionError::AssemblyError(msg) => Self::AssemblyError(msg),
            SessionError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<parcel_core::Error> for ApiError {
    fn from(err: parcel_core::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let code = self.code();
        record_upload_error(code);

        let message = self.to_string();
        let missing = match self {
            Self::Incomplete { missing } => Some(missing),
            _ => None,
        };
        let body = ErrorResponse {
            code: code.to_string(),
            message,
            missing,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

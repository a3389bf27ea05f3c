//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single request to the upload server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned {status} ({code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
        missing: Option<Vec<u64>>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    ///
    /// Network failures, timeouts and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Failure of a whole upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is empty")]
    EmptyFile,

    #[error("{0}")]
    Core(parcel_core::Error),

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

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("chunk {index} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        index: u64,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("upload cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<TransportError> for UploadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => Self::NetworkError(msg),
            e @ TransportError::Timeout(_) => Self::NetworkError(e.to_string()),
            TransportError::InvalidResponse(msg) => Self::NetworkError(msg),
            TransportError::Rejected {
                status,
                code,
                message,
                missing,
            } => match code.as_str() {
                "invalid_request" => Self::InvalidRequest(message),
                "invalid_chunk" => Self::InvalidChunk(message),
                "session_conflict" => Self::SessionConflict(message),
                "session_failed" => Self::SessionFailed(message),
                "not_found" => Self::NotFound(message),
                "incomplete" => Self::Incomplete {
                    missing: missing.unwrap_or_default(),
                },
                "assembly_error" => Self::AssemblyError(message),
                _ => Self::Server { status, message },
            },
        }
    }
}

impl From<parcel_core::Error> for UploadError {
    fn from(err: parcel_core::Error) -> Self {
        match err {
            parcel_core::Error::Io(e) => Self::Io(e),
            other => Self::Core(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

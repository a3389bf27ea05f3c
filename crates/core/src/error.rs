//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid hash window: {0}")]
    InvalidWindow(usize),

    #[error("invalid chunk size: {size} (must be between {min} and {max})")]
    InvalidChunkSize { size: u64, min: u64, max: u64 },

    #[error("chunk index {index} out of range (total chunks: {total})")]
    ChunkOutOfRange { index: u64, total: u64 },

    #[error("source ended early: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("invalid file ID: {0}")]
    InvalidFileId(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

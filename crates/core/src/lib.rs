//! Core domain types and shared logic for Parcel.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content fingerprints and the streaming hasher
//! - Byte sources with random access
//! - Chunk layout and the chunker
//! - Upload session lifecycle and wire types
//! - Configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod source;
pub mod upload;

pub use chunk::{Chunk, ChunkLayout, Chunker, read_chunk};
pub use error::{Error, Result};
pub use hash::{Fingerprint, FingerprintHasher, hash_reader, hash_source};
pub use source::{ByteSource, FileSource, MemorySource};
pub use upload::{
    FileId, FileInfo, SessionView, StoredSession, UploadResult, UploadSession, UploadStatus,
};

/// Default chunk size: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Maximum chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Minimum chunk size: 64 KiB
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;

/// Default window used when hashing a source: 2 MiB
pub const DEFAULT_HASH_WINDOW: usize = 2 * 1024 * 1024;

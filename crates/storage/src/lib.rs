//! Object storage abstraction, backends and the chunk store for Parcel.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait with atomic and streaming writes
//! - Backends: local filesystem and in-memory
//! - The [`ChunkStore`] that holds chunk payloads and assembles files
//! - The [`RecordStore`] that keeps session and catalog records across restarts

pub mod backends;
pub mod chunk_store;
pub mod error;
pub mod records;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use chunk_store::{AssembledFile, ChunkStore, ObjectChunkStore};
pub use error::{StorageError, StorageResult};
pub use records::{ObjectRecordStore, RecordStore};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use parcel_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

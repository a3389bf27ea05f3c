//! Test fixtures for generating test data and stores.

use bytes::Bytes;
use parcel_storage::{FilesystemBackend, MemoryBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Object store under test. Holds the temp directory alive for filesystem stores.
pub struct TestStore {
    pub store: Arc<dyn ObjectStore>,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    pub async fn filesystem() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path().join("objects"))
            .await
            .expect("Failed to create filesystem backend");
        Self {
            store: Arc::new(backend),
            _temp_dir: Some(temp_dir),
        }
    }

    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryBackend::new()),
            _temp_dir: None,
        }
    }

    /// Both backends, for contract tests.
    pub async fn all() -> Vec<Self> {
        vec![Self::filesystem().await, Self::memory()]
    }
}

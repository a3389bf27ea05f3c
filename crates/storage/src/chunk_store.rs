//! Chunk payload storage and file assembly.
//!
//! Layout inside the object store:
//! - chunk payloads: `chunks/{fp[0..2]}/{fp}/{index:08}`
//! - assembled files: `files/{fp[0..2]}/{fp}`

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parcel_core::{Fingerprint, FingerprintHasher};
use std::sync::Arc;
use tracing::instrument;

/// Object key of one chunk payload.
pub fn chunk_key(fingerprint: &Fingerprint, index: u64) -> String {
    format!("{}{index:08}", chunk_prefix(fingerprint))
}

/// Prefix shared by every chunk of a fingerprint.
pub fn chunk_prefix(fingerprint: &Fingerprint) -> String {
    let hex = fingerprint.to_hex();
    format!("chunks/{}/{hex}/", &hex[..2])
}

/// Object key of an assembled file.
pub fn file_key(fingerprint: &Fingerprint) -> String {
    let hex = fingerprint.to_hex();
    format!("files/{}/{hex}", &hex[..2])
}

/// Handle to an assembled, verified file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledFile {
    pub fingerprint: Fingerprint,
    pub key: String,
    pub size: u64,
}

/// Durable storage for chunk payloads, keyed by `(fingerprint, index)`.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Store a chunk payload, replacing any previous payload for the index.
    async fn put(&self, fingerprint: &Fingerprint, index: u64, data: Bytes) -> StorageResult<()>;

    /// Size of the stored payload for the index, `None` when there is none.
    async fn stored_len(&self, fingerprint: &Fingerprint, index: u64)
    -> StorageResult<Option<u64>>;

    /// Concatenate chunks `0..total_chunks` into one file and verify that the
    /// result hashes to `fingerprint`. A file that fails verification is removed.
    async fn assemble(
        &self,
        fingerprint: &Fingerprint,
        total_chunks: u64,
    ) -> StorageResult<AssembledFile>;

    /// Delete every chunk payload of a fingerprint. Returns how many were removed.
    async fn release(&self, fingerprint: &Fingerprint) -> StorageResult<usize>;

    /// Stream an assembled file.
    async fn open_file(&self, fingerprint: &Fingerprint) -> StorageResult<ByteStream>;

    /// Delete an assembled file.
    async fn delete_file(&self, fingerprint: &Fingerprint) -> StorageResult<()>;
}

/// [`ChunkStore`] layered on any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectChunkStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectChunkStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Copy every chunk into `upload`, hashing as it goes.
    async fn copy_chunks(
        &self,
        fingerprint: &Fingerprint,
        total_chunks: u64,
        upload: &mut Box<dyn StreamingUpload>,
    ) -> StorageResult<Fingerprint> {
        let mut hasher = FingerprintHasher::new();
        for index in 0..total_chunks {
            let mut stream = self
                .store
                .get_stream(&chunk_key(fingerprint, index))
                .await
                .map_err(|e| match e {
                    StorageError::NotFound(_) => StorageError::MissingChunk {
                        fingerprint: fingerprint.to_hex(),
                        index,
                    },
                    other => other,
                })?;
            while let Some(piece) = stream.next().await {
                let piece = piece?;
                hasher.update(&piece);
                upload.write(piece).await?;
            }
        }
        Ok(hasher.finalize())
    }
}

#[async_trait]
impl ChunkStore for ObjectChunkStore {
    #[instrument(skip(self, data), fields(fingerprint = %fingerprint, size = data.len()))]
    async fn put(&self, fingerprint: &Fingerprint, index: u64, data: Bytes) -> StorageResult<()> {
        self.store.put(&chunk_key(fingerprint, index), data).await
    }

    async fn stored_len(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
    ) -> StorageResult<Option<u64>> {
        match self.store.head(&chunk_key(fingerprint, index)).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(fingerprint = %fingerprint, backend = self.store.backend_name()))]
    async fn assemble(
        &self,
        fingerprint: &Fingerprint,
        total_chunks: u64,
    ) -> StorageResult<AssembledFile> {
        let key = file_key(fingerprint);
        let mut upload = self.store.put_stream(&key).await?;

        let actual = match self.copy_chunks(fingerprint, total_chunks, &mut upload).await {
            Ok(actual) => actual,
            Err(e) => {
                upload.abort().await?;
                return Err(e);
            }
        };

        if actual != *fingerprint {
            upload.abort().await?;
            tracing::warn!(expected = %fingerprint, actual = %actual, "assembled file hash mismatch");
            return Err(StorageError::HashMismatch {
                expected: fingerprint.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let size = upload.finish().await?;
        tracing::debug!(size, "file assembled");

        Ok(AssembledFile {
            fingerprint: *fingerprint,
            key,
            size,
        })
    }

    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    async fn release(&self, fingerprint: &Fingerprint) -> StorageResult<usize> {
        let keys = self.store.list(&chunk_prefix(fingerprint)).await?;
        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(()) => removed += 1,
                // Raced with another release.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn open_file(&self, fingerprint: &Fingerprint) -> StorageResult<ByteStream> {
        self.store.get_stream(&file_key(fingerprint)).await
    }

    async fn delete_file(&self, fingerprint: &Fingerprint) -> StorageResult<()> {
        self.store.delete(&file_key(fingerprint)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use futures::TryStreamExt;

    fn store() -> (MemoryBackend, ObjectChunkStore) {
        let backend = MemoryBackend::new();
        let chunks = ObjectChunkStore::new(Arc::new(backend.clone()));
        (backend, chunks)
    }

    #[test]
    fn test_key_layout() {
        let fp = Fingerprint::compute(b"layout");
        let hex = fp.to_hex();
        assert_eq!(
            chunk_key(&fp, 7),
            format!("chunks/{}/{hex}/00000007", &hex[..2])
        );
        assert_eq!(file_key(&fp), format!("files/{}/{hex}", &hex[..2]));
        assert!(chunk_key(&fp, 0).starts_with(&chunk_prefix(&fp)));
    }

    #[tokio::test]
    async fn test_assemble_concatenates_in_index_order() {
        let (_backend, chunks) = store();
        let data = b"hello, chunked world".to_vec();
        let fp = Fingerprint::compute(&data);

        // Insert out of order.
        chunks.put(&fp, 2, Bytes::copy_from_slice(&data[16..])).await.unwrap();
        chunks.put(&fp, 0, Bytes::copy_from_slice(&data[..8])).await.unwrap();
        chunks.put(&fp, 1, Bytes::copy_from_slice(&data[8..16])).await.unwrap();
        assert_eq!(chunks.stored_len(&fp, 1).await.unwrap(), Some(8));
        assert_eq!(chunks.stored_len(&fp, 3).await.unwrap(), None);

        let file = chunks.assemble(&fp, 3).await.unwrap();
        assert_eq!(file.size, data.len() as u64);

        let body: Vec<Bytes> = chunks.open_file(&fp).await.unwrap().try_collect().await.unwrap();
        assert_eq!(body.concat(), data);
    }

    #[tokio::test]
    async fn test_assemble_rejects_hash_mismatch() {
        let (backend, chunks) = store();
        let fp = Fingerprint::compute(b"expected content");
        chunks.put(&fp, 0, Bytes::from("tampered content")).await.unwrap();

        let err = chunks.assemble(&fp, 1).await.unwrap_err();
        assert!(matches!(err, StorageError::HashMismatch { .. }));
        assert!(!backend.exists(&file_key(&fp)).await.unwrap());
    }

    #[tokio::test]
    async fn test_assemble_reports_missing_chunk() {
        let (_backend, chunks) = store();
        let fp = Fingerprint::compute(b"ab");
        chunks.put(&fp, 0, Bytes::from("a")).await.unwrap();

        let err = chunks.assemble(&fp, 2).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingChunk { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_release_removes_only_that_fingerprint() {
        let (backend, chunks) = store();
        let a = Fingerprint::compute(b"a");
        let b = Fingerprint::compute(b"b");
        chunks.put(&a, 0, Bytes::from("a")).await.unwrap();
        chunks.put(&a, 1, Bytes::from("a")).await.unwrap();
        chunks.put(&b, 0, Bytes::from("b")).await.unwrap();

        assert_eq!(chunks.release(&a).await.unwrap(), 2);
        assert_eq!(chunks.release(&a).await.unwrap(), 0);
        assert_eq!(chunks.stored_len(&b, 0).await.unwrap(), Some(1));
        assert_eq!(backend.len(), 1);
    }
}

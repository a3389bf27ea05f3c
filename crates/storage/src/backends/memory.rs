//! In-process storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    modified: OffsetDateTime,
}

/// Object store held entirely in memory. Contents are lost on drop.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn check_key(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn fetch(&self, key: &str) -> StorageResult<StoredObject> {
        Self::check_key(key)?;
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn store(&self, key: &str, data: Bytes) {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                modified: OffsetDateTime::now_utc(),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Self::check_key(key)?;
        Ok(self.objects.contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let object = self.fetch(key)?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: Some(object.modified),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Ok(self.fetch(key)?.data)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.fetch(key)?.data;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        Self::check_key(key)?;
        self.store(key, data);
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Self::check_key(key)?;
        Ok(Box::new(MemoryUpload {
            backend: self.clone(),
            key: key.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::check_key(key)?;
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Buffers writes and inserts the object on finish.
struct MemoryUpload {
    backend: MemoryBackend,
    key: String,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let size = self.buffer.len() as u64;
        self.backend.store(&self.key, self.buffer.freeze());
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

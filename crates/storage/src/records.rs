//! Session and catalog records kept next to the payloads.
//!
//! Layout inside the object store:
//! - session records: `records/sessions/{fp[0..2]}/{fp}.json`
//! - catalog entries: `records/files/{file_id}.json`

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::{FileId, FileInfo, Fingerprint, StoredSession};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::instrument;

const SESSION_PREFIX: &str = "records/sessions/";
const FILE_PREFIX: &str = "records/files/";

/// Object key of a session record.
pub fn session_record_key(fingerprint: &Fingerprint) -> String {
    let hex = fingerprint.to_hex();
    format!("{SESSION_PREFIX}{}/{hex}.json", &hex[..2])
}

/// Object key of a catalog entry.
pub fn file_record_key(file_id: &FileId) -> String {
    format!("{FILE_PREFIX}{file_id}.json")
}

/// Durable session and catalog state, reloaded when the server starts.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Write a session record, replacing the previous one for its fingerprint.
    async fn save_session(&self, record: &StoredSession) -> StorageResult<()>;

    /// Remove a session record. Missing records are not an error.
    async fn delete_session(&self, fingerprint: &Fingerprint) -> StorageResult<()>;

    /// Every readable session record. Unreadable ones are skipped.
    async fn load_sessions(&self) -> StorageResult<Vec<StoredSession>>;

    async fn save_file(&self, info: &FileInfo) -> StorageResult<()>;

    /// Remove a catalog entry. Missing entries are not an error.
    async fn delete_file(&self, file_id: &FileId) -> StorageResult<()>;

    /// Every readable catalog entry. Unreadable ones are skipped.
    async fn load_files(&self) -> StorageResult<Vec<FileInfo>>;
}

/// [`RecordStore`] that writes JSON objects into any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectRecordStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectRecordStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn write<T: Serialize + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let body = serde_json::to_vec(value)?;
        self.store.put(key, Bytes::from(body)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match self.store.delete(key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, prefix: &str) -> StorageResult<Vec<T>> {
        let mut records = Vec::new();
        for key in self.store.list(prefix).await? {
            let body = match self.store.get(&key).await {
                Ok(body) => body,
                // Deleted between list and get.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            match serde_json::from_slice(&body) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for ObjectRecordStore {
    #[instrument(skip(self, record), fields(fingerprint = %record.fingerprint))]
    async fn save_session(&self, record: &StoredSession) -> StorageResult<()> {
        self.write(&session_record_key(&record.fingerprint), record)
            .await
    }

    async fn delete_session(&self, fingerprint: &Fingerprint) -> StorageResult<()> {
        self.remove(&session_record_key(fingerprint)).await
    }

    async fn load_sessions(&self) -> StorageResult<Vec<StoredSession>> {
        self.read_all(SESSION_PREFIX).await
    }

    #[instrument(skip(self, info), fields(file_id = %info.file_id))]
    async fn save_file(&self, info: &FileInfo) -> StorageResult<()> {
        self.write(&file_record_key(&info.file_id), info).await
    }

    async fn delete_file(&self, file_id: &FileId) -> StorageResult<()> {
        self.remove(&file_record_key(file_id)).await
    }

    async fn load_files(&self) -> StorageResult<Vec<FileInfo>> {
        self.read_all(FILE_PREFIX).await
    }
}

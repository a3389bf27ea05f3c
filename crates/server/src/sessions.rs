//! Upload session manager.
//!
//! Sessions live in a per-fingerprint arena. Each record has its own async
//! mutex; no operation ever holds two of them. Chunk payloads are written with
//! the record unlocked so uploads to one session overlap, while completion
//! holds the lock for the whole assembly.
//!
//! Session records and catalog entries are mirrored into a [`RecordStore`] so
//! [`SessionManager::restore`] can rebuild them after a restart.

use crate::catalog::FileCatalog;
use crate::metrics::{
    ACTIVE_UPLOAD_SESSIONS, BYTES_RECEIVED, CHUNK_UPLOAD_DURATION, CHUNKS_DUPLICATE,
    CHUNKS_RECEIVED, UPLOAD_COMPLETE_DURATION, UPLOAD_SESSIONS_COMPLETED, UPLOAD_SESSIONS_CREATED,
    UPLOAD_SESSIONS_EXPIRED, UPLOAD_SESSIONS_FAILED, UPLOAD_SESSIONS_RESUMED,
};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parcel_core::config::UploadConfig;
use parcel_core::upload::{ChunkAck, InitUploadRequest};
use parcel_core::{
    ChunkLayout, FileId, FileInfo, Fingerprint, SessionView, StoredSession, UploadResult,
    UploadSession, UploadStatus,
};
use parcel_storage::{ByteStream, ChunkStore, RecordStore, StorageError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

/// Session manager errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error(
        "session {fingerprint} already exists with total_size {total_size} and chunk_size {chunk_size}"
    )]
    SessionConflict {
        fingerprint: Fingerprint,
        total_size: u64,
        chunk_size: u64,
    },

    #[error("session failed: {0}")]
    SessionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upload incomplete: {} chunks missing", missing.len())]
    Incomplete { missing: Vec<u64> },

    #[error("assembly failed: {0}")]
    AssemblyError(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result of [`SessionManager::init`].
#[derive(Clone, Debug)]
pub struct InitOutcome {
    pub view: SessionView,
    /// `false` when an existing session was reused.
    pub created: bool,
}

struct SessionRecord {
    session: UploadSession,
    /// Whether surviving payloads have been looked up in the chunk store.
    recovered: bool,
}

type SessionHandle = Arc<Mutex<SessionRecord>>;

/// Owns every upload session and the catalog of completed files.
pub struct SessionManager {
    sessions: DashMap<Fingerprint, SessionHandle>,
    chunks: Arc<dyn ChunkStore>,
    records: Arc<dyn RecordStore>,
    catalog: FileCatalog,
    limits: UploadConfig,
}

fn ack(session: &UploadSession, index: u64) -> ChunkAck {
    ChunkAck {
        fingerprint: session.fingerprint,
        index,
        received_chunks: session.received.len() as u64,
        total_chunks: session.total_chunks(),
    }
}

fn failure_of(session: &UploadSession) -> SessionError {
    SessionError::SessionFailed(
        session
            .failure
            .clone()
            .unwrap_or_else(|| format!("session {} failed", session.fingerprint)),
    )
}

impl SessionManager {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        records: Arc<dyn RecordStore>,
        limits: UploadConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            chunks,
            records,
            catalog: FileCatalog::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &UploadConfig {
        &self.limits
    }

    /// Number of sessions currently tracked, in any state.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn refresh_gauge(&self) {
        ACTIVE_UPLOAD_SESSIONS.set(self.sessions.len() as i64);
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> SessionResult<SessionHandle> {
        self.sessions
            .get(fingerprint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(format!("upload session {fingerprint}")))
    }

    /// Whether `handle` is still the arena's record for the fingerprint.
    fn is_current(&self, fingerprint: &Fingerprint, handle: &SessionHandle) -> bool {
        self.sessions
            .get(fingerprint)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), handle))
    }

    async fn forget_record(&self, fingerprint: &Fingerprint) {
        if let Err(e) = self.records.delete_session(fingerprint).await {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "failed to delete session record");
        }
    }

    fn validate_init(&self, req: &InitUploadRequest) -> SessionResult<ChunkLayout> {
        let limits = &self.limits;
        if req.total_size == 0 {
            return Err(SessionError::InvalidRequest(
                "total_size must be greater than 0".to_string(),
            ));
        }
        if req.total_size > limits.max_file_size {
            return Err(SessionError::InvalidRequest(format!(
                "total_size {} exceeds maximum {}",
                req.total_size, limits.max_file_size
            )));
        }
        if req.chunk_size < limits.min_chunk_size || req.chunk_size > limits.max_chunk_size {
            return Err(SessionError::InvalidRequest(format!(
                "chunk_size {} must be between {} and {}",
                req.chunk_size, limits.min_chunk_size, limits.max_chunk_size
            )));
        }
        ChunkLayout::new(req.total_size, req.chunk_size)
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))
    }

    /// Count payloads that already sit in the chunk store as received.
    ///
    /// Only payloads whose size matches the session's layout count. Others were
    /// written under a different chunk size; a later upload of the index
    /// overwrites them.
    async fn recover_chunks(&self, session: &mut UploadSession) -> SessionResult<()> {
        let mut stale = 0;
        for index in 0..session.total_chunks() {
            let Some(stored) = self.chunks.stored_len(&session.fingerprint, index).await? else {
                continue;
            };
            let expected = session
                .layout
                .expected_len(index)
                .map_err(|e| SessionError::InvalidChunk(e.to_string()))?;
            if stored == expected {
                session.received.insert(index);
            } else {
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::warn!(stale, "ignoring stored chunks that do not fit the session layout");
        }
        if !session.received.is_empty() {
            session.status = UploadStatus::InProgress;
            tracing::info!(
                recovered = session.received.len(),
                "recovered stored chunks for new session"
            );
        }
        Ok(())
    }

    /// Open a session for a fingerprint, or reuse the existing one.
    #[instrument(skip(self, req), fields(fingerprint = %req.fingerprint))]
    pub async fn init(&self, req: InitUploadRequest) -> SessionResult<InitOutcome> {
        let layout = self.validate_init(&req)?;
        let now = OffsetDateTime::now_utc();
        let ttl = self.limits.session_ttl();
        let fresh = || {
            UploadSession::new(
                req.fingerprint,
                layout,
                req.file_name.clone(),
                req.mime_type.clone(),
                now,
                ttl,
            )
        };

        loop {
            let (handle, mut created) = match self.sessions.entry(req.fingerprint) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let handle = Arc::new(Mutex::new(SessionRecord {
                        session: fresh(),
                        recovered: false,
                    }));
                    entry.insert(handle.clone());
                    (handle, true)
                }
            };

            let mut record = handle.lock().await;
            if !self.is_current(&req.fingerprint, &handle) {
                // Swept or deleted while we waited for the lock.
                continue;
            }
            self.refresh_gauge();

            if !created {
                if record.session.status == UploadStatus::Failed {
                    tracing::info!("replacing failed session");
                    self.chunks.release(&req.fingerprint).await?;
                    record.session = fresh();
                    // Payloads were just released; nothing to recover.
                    record.recovered = true;
                    created = true;
                } else {
                    let existing = record.session.layout;
                    if existing != layout {
                        return Err(SessionError::SessionConflict {
                            fingerprint: req.fingerprint,
                            total_size: existing.total_size(),
                            chunk_size: existing.chunk_size(),
                        });
                    }
                    let session = &mut record.session;
                    if session.status.is_active() {
                        session.touch(now, ttl);
                    }
                    if session.file_name.is_none() {
                        session.file_name = req.file_name.clone();
                    }
                    if session.mime_type.is_none() {
                        session.mime_type = req.mime_type.clone();
                    }
                }
            }

            if !record.recovered {
                self.recover_chunks(&mut record.session).await?;
                record.recovered = true;
            }

            if created {
                let stored = StoredSession::of(&record.session);
                if let Err(e) = self.records.save_session(&stored).await {
                    record.session.status = UploadStatus::Failed;
                    record.session.failure = Some(format!("session record not saved: {e}"));
                    self.sessions
                        .remove_if(&req.fingerprint, |_, current| Arc::ptr_eq(current, &handle));
                    self.refresh_gauge();
                    return Err(e.into());
                }

                UPLOAD_SESSIONS_CREATED.inc();
                tracing::info!(
                    total_size = req.total_size,
                    chunk_size = req.chunk_size,
                    total_chunks = layout.total_chunks(),
                    "upload session created"
                );
            } else {
                UPLOAD_SESSIONS_RESUMED.inc();
                tracing::debug!(
                    received = record.session.received.len(),
                    status = %record.session.status,
                    "upload session reused"
                );
            }

            return Ok(InitOutcome {
                view: record.session.view(),
                created,
            });
        }
    }

    /// Current view of a session.
    pub async fn status(&self, fingerprint: &Fingerprint) -> SessionResult<SessionView> {
        let handle = self.lookup(fingerprint)?;
        let record = handle.lock().await;
        Ok(record.session.view())
    }

    /// Accept one chunk payload.
    ///
    /// Validation happens before anything is written; a rejected chunk leaves
    /// the session untouched. Receiving an index twice is a no-op success.
    #[instrument(skip(self, data), fields(fingerprint = %fingerprint, size = data.len()))]
    pub async fn receive_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
        data: Bytes,
    ) -> SessionResult<ChunkAck> {
        let started = Instant::now();
        let handle = self.lookup(fingerprint)?;
        let ttl = self.limits.session_ttl();
        let size = data.len() as u64;

        {
            let mut record = handle.lock().await;
            let session = &mut record.session;
            match session.status {
                UploadStatus::Completed => return Ok(ack(session, index)),
                UploadStatus::Failed => return Err(failure_of(session)),
                UploadStatus::Initializing | UploadStatus::InProgress => {}
            }

            let expected = session
                .layout
                .expected_len(index)
                .map_err(|e| SessionError::InvalidChunk(e.to_string()))?;
            if size != expected {
                return Err(SessionError::InvalidChunk(format!(
                    "chunk {index} has {size} bytes, expected {expected}"
                )));
            }

            if session.received.contains(&index) {
                session.touch(OffsetDateTime::now_utc(), ttl);
                CHUNKS_DUPLICATE.inc();
                return Ok(ack(session, index));
            }
        }

        self.chunks.put(fingerprint, index, data).await?;

        let mut record = handle.lock().await;
        let session = &mut record.session;
        match session.status {
            UploadStatus::Failed => return Err(failure_of(session)),
            UploadStatus::Completed => {
                // Completed while this payload was in flight; drop the leftover.
                if let Err(e) = self.chunks.release(fingerprint).await {
                    tracing::warn!(error = %e, "failed to release late chunk payload");
                }
            }
            UploadStatus::Initializing | UploadStatus::InProgress => {
                session.mark_received(index, OffsetDateTime::now_utc(), ttl);
            }
        }

        CHUNKS_RECEIVED.inc();
        BYTES_RECEIVED.inc_by(size);
        CHUNK_UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());

        Ok(ack(session, index))
    }

    /// Assemble the file once every chunk is present.
    ///
    /// A session that fails verification becomes `Failed`; a completed session
    /// returns its stored result on every later call.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn complete(&self, fingerprint: &Fingerprint) -> SessionResult<UploadResult> {
        let handle = self.lookup(fingerprint)?;
        let mut record = handle.lock().await;
        let session = &mut record.session;

        match session.status {
            UploadStatus::Completed => {
                return session.result.clone().ok_or_else(|| {
                    SessionError::AssemblyError("completed session has no result".to_string())
                });
            }
            UploadStatus::Failed => return Err(failure_of(session)),
            UploadStatus::Initializing | UploadStatus::InProgress => {}
        }

        let missing = session.missing_chunks();
        if !missing.is_empty() {
            return Err(SessionError::Incomplete { missing });
        }

        let started = Instant::now();
        let now = OffsetDateTime::now_utc();

        let file = match self
            .chunks
            .assemble(fingerprint, session.total_chunks())
            .await
        {
            Ok(file) => file,
            Err(e) => {
                session.status = UploadStatus::Failed;
                session.failure = Some(e.to_string());
                session.updated_at = now;
                UPLOAD_SESSIONS_FAILED.inc();
                tracing::warn!(error = %e, "assembly failed, session marked failed");
                return Err(SessionError::AssemblyError(e.to_string()));
            }
        };

        let result = UploadResult::new(*fingerprint, FileId::new(), file.size);
        let info = FileInfo {
            file_id: result.file_id,
            fingerprint: *fingerprint,
            file_name: session.file_name.clone(),
            mime_type: session.mime_type.clone(),
            size: file.size,
            created_at: session.created_at,
            completed_at: now,
        };

        // Catalog entry first: a completed session record always has one.
        self.records.save_file(&info).await?;
        let mut stored = StoredSession::of(session);
        stored.result = Some(result.clone());
        if let Err(e) = self.records.save_session(&stored).await {
            if let Err(cleanup) = self.records.delete_file(&info.file_id).await {
                tracing::warn!(error = %cleanup, "failed to roll back catalog record");
            }
            return Err(e.into());
        }
        self.catalog.insert(info);

        session.status = UploadStatus::Completed;
        session.result = Some(result.clone());
        session.updated_at = now;

        if let Err(e) = self.chunks.release(fingerprint).await {
            tracing::warn!(error = %e, "failed to release chunk payloads after assembly");
        }

        UPLOAD_SESSIONS_COMPLETED.inc();
        UPLOAD_COMPLETE_DURATION.observe(started.elapsed().as_secs_f64());
        tracing::info!(
            file_id = %result.file_id,
            size = result.size,
            "upload completed"
        );

        Ok(result)
    }

    /// Completed files, most recent first.
    pub fn list_files(&self) -> Vec<FileInfo> {
        self.catalog.list()
    }

    pub fn file(&self, file_id: &FileId) -> SessionResult<FileInfo> {
        self.catalog
            .get(file_id)
            .ok_or_else(|| SessionError::NotFound(format!("file {file_id}")))
    }

    /// Catalog entry plus a byte stream of the assembled file.
    pub async fn open_file(&self, file_id: &FileId) -> SessionResult<(FileInfo, ByteStream)> {
        let info = self.file(file_id)?;
        let stream = self
            .chunks
            .open_file(&info.fingerprint)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => SessionError::NotFound(format!("file {file_id}")),
                other => SessionError::Storage(other),
            })?;
        Ok((info, stream))
    }

    /// Delete a completed file and forget its session, so the same content
    /// can be uploaded again.
    #[instrument(skip(self), fields(file_id = %file_id))]
    pub async fn delete_file(&self, file_id: &FileId) -> SessionResult<FileInfo> {
        let info = self.file(file_id)?;
        let fingerprint = info.fingerprint;

        match self.chunks.delete_file(&fingerprint).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.records.delete_file(file_id).await?;
        self.catalog.remove(file_id);

        if let Ok(handle) = self.lookup(&fingerprint) {
            let mut record = handle.lock().await;
            let owns_file = record
                .session
                .result
                .as_ref()
                .is_some_and(|result| result.file_id == *file_id);
            if owns_file && self.is_current(&fingerprint, &handle) {
                self.forget_record(&fingerprint).await;
                record.session.status = UploadStatus::Failed;
                record.session.failure = Some(format!("file {file_id} was deleted"));
                self.sessions
                    .remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &handle));
            }
        }

        self.refresh_gauge();
        tracing::info!(fingerprint = %fingerprint, "file deleted");
        Ok(info)
    }

    /// Reload catalog entries and session records left by a previous run.
    ///
    /// Unfinished sessions get a fresh expiry and recover their stored chunks.
    /// A completed session whose file was deleted is dropped. Call once at
    /// startup, before serving requests.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionResult<usize> {
        for info in self.records.load_files().await? {
            self.catalog.insert(info);
        }

        let now = OffsetDateTime::now_utc();
        let ttl = self.limits.session_ttl();
        let mut restored = 0;

        for stored in self.records.load_sessions().await? {
            let fingerprint = stored.fingerprint;
            let mut session = match stored.into_session(now, ttl) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(fingerprint = %fingerprint, error = %e, "dropping unusable session record");
                    self.forget_record(&fingerprint).await;
                    continue;
                }
            };

            let completed = session.result.as_ref().map(|result| result.file_id);
            let filed = self.catalog.find_by_fingerprint(&fingerprint);
            match (completed, filed) {
                (Some(file_id), Some(info)) if file_id == info.file_id => {}
                (Some(_), _) => {
                    tracing::debug!(fingerprint = %fingerprint, "dropping session of a deleted file");
                    self.forget_record(&fingerprint).await;
                    continue;
                }
                (None, Some(info)) => {
                    // The previous run stopped between the catalog write and the
                    // session write of a completion.
                    session.received = (0..session.total_chunks()).collect();
                    session.status = UploadStatus::Completed;
                    session.result =
                        Some(UploadResult::new(fingerprint, info.file_id, info.size));
                    if let Err(e) = self.records.save_session(&StoredSession::of(&session)).await {
                        tracing::warn!(fingerprint = %fingerprint, error = %e, "failed to rewrite session record");
                    }
                    if let Err(e) = self.chunks.release(&fingerprint).await {
                        tracing::warn!(fingerprint = %fingerprint, error = %e, "failed to release chunk payloads");
                    }
                }
                (None, None) => self.recover_chunks(&mut session).await?,
            }

            self.sessions.insert(
                fingerprint,
                Arc::new(Mutex::new(SessionRecord {
                    session,
                    recovered: true,
                })),
            );
            restored += 1;
        }

        self.refresh_gauge();
        tracing::info!(
            sessions = restored,
            files = self.catalog.len(),
            "upload state restored"
        );
        Ok(restored)
    }

    /// Remove unfinished sessions whose expiry lies before `now`, with their
    /// chunk payloads. Sessions busy with another operation are skipped.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> usize {
        let candidates: Vec<(Fingerprint, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (fingerprint, handle) in candidates {
            let Ok(mut record) = handle.try_lock() else {
                continue;
            };
            if !record.session.is_expired(now) {
                continue;
            }

            self.forget_record(&fingerprint).await;
            // Anyone still holding the handle sees a failed session.
            record.session.status = UploadStatus::Failed;
            record.session.failure = Some("session expired".to_string());
            self.sessions
                .remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &handle));

            if let Err(e) = self.chunks.release(&fingerprint).await {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "failed to release expired chunks");
            }
            removed += 1;
        }

        if removed > 0 {
            UPLOAD_SESSIONS_EXPIRED.inc_by(removed as u64);
            tracing::info!(removed, "expired upload sessions swept");
        }
        self.refresh_gauge();
        removed
    }
}

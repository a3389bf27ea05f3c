//! Upload session types and lifecycle.

use crate::chunk::ChunkLayout;
use crate::hash::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier assigned to a file when its upload completes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidFileId(format!("{s}: {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FileId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Session exists but no chunk has been accepted yet.
    Initializing,
    /// At least one chunk has been accepted.
    InProgress,
    /// Every chunk was received and the file was assembled.
    Completed,
    /// Assembly failed. Terminal.
    Failed,
}

impl UploadStatus {
    /// Check if the session can still accept chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::InProgress)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub fingerprint: Fingerprint,
    pub file_id: FileId,
    /// Path the assembled file can be downloaded from.
    pub download_reference: String,
    pub size: u64,
}

impl UploadResult {
    pub fn new(fingerprint: Fingerprint, file_id: FileId, size: u64) -> Self {
        Self {
            fingerprint,
            file_id,
            download_reference: format!("/v1/files/{file_id}"),
            size,
        }
    }
}

/// Server-side state of one upload, keyed by fingerprint.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub fingerprint: Fingerprint,
    pub layout: ChunkLayout,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub status: UploadStatus,
    /// Indices accepted so far, always `< layout.total_chunks()`.
    pub received: BTreeSet<u64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Set once the session is `Completed`.
    pub result: Option<UploadResult>,
    /// Set once the session is `Failed`.
    pub failure: Option<String>,
}

impl UploadSession {
    /// Create a new session in the `Initializing` state.
    pub fn new(
        fingerprint: Fingerprint,
        layout: ChunkLayout,
        file_name: Option<String>,
        mime_type: Option<String>,
        now: OffsetDateTime,
        expires_in: time::Duration,
    ) -> Self {
        Self {
            fingerprint,
            layout,
            file_name,
            mime_type,
            status: UploadStatus::Initializing,
            received: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
            result: None,
            failure: None,
        }
    }

    pub fn total_chunks(&self) -> u64 {
        self.layout.total_chunks()
    }

    /// Whether every chunk index has been received.
    pub fn is_full(&self) -> bool {
        self.received.len() as u64 == self.total_chunks()
    }

    /// Indices not yet received, ascending.
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks())
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    /// Record an accepted chunk and push the expiry forward.
    ///
    /// Returns `false` when the index was already recorded.
    pub fn mark_received(
        &mut self,
        index: u64,
        now: OffsetDateTime,
        expires_in: time::Duration,
    ) -> bool {
        let inserted = self.received.insert(index);
        if self.status == UploadStatus::Initializing {
            self.status = UploadStatus::InProgress;
        }
        self.touch(now, expires_in);
        inserted
    }

    pub fn touch(&mut self, now: OffsetDateTime, expires_in: time::Duration) {
        self.updated_at = now;
        self.expires_at = now + expires_in;
    }

    /// Expired sessions that never finished are eligible for sweeping.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.status.is_active() && now > self.expires_at
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            fingerprint: self.fingerprint,
            status: self.status,
            total_size: self.layout.total_size(),
            chunk_size: self.layout.chunk_size(),
            total_chunks: self.total_chunks(),
            received_chunk_indices: self.received.iter().copied().collect(),
        }
    }
}

/// Snapshot of a session returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub fingerprint: Fingerprint,
    pub status: UploadStatus,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Sorted ascending.
    pub received_chunk_indices: Vec<u64>,
}

impl SessionView {
    /// Indices the server does not have yet, ascending.
    pub fn missing_chunks(&self) -> Vec<u64> {
        let received: BTreeSet<u64> = self.received_chunk_indices.iter().copied().collect();
        (0..self.total_chunks)
            .filter(|i| !received.contains(i))
            .collect()
    }
}

/// Catalog entry for a completed file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: FileId,
    pub fingerprint: Fingerprint,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// Durable form of an [`UploadSession`]: its negotiated shape and, once
/// completed, its result. Received indices are rebuilt from stored payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub fingerprint: Fingerprint,
    pub total_size: u64,
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
}

impl StoredSession {
    pub fn of(session: &UploadSession) -> Self {
        Self {
            fingerprint: session.fingerprint,
            total_size: session.layout.total_size(),
            chunk_size: session.layout.chunk_size(),
            file_name: session.file_name.clone(),
            mime_type: session.mime_type.clone(),
            created_at: session.created_at,
            result: session.result.clone(),
        }
    }

    /// Rebuild the session. A record with a result comes back `Completed` with
    /// every index received; otherwise it starts over as `Initializing`.
    pub fn into_session(
        self,
        now: OffsetDateTime,
        expires_in: time::Duration,
    ) -> crate::Result<UploadSession> {
        let layout = ChunkLayout::new(self.total_size, self.chunk_size)?;
        let mut session = UploadSession::new(
            self.fingerprint,
            layout,
            self.file_name,
            self.mime_type,
            now,
            expires_in,
        );
        session.created_at = self.created_at;
        if let Some(result) = self.result {
            session.received = (0..session.total_chunks()).collect();
            session.status = UploadStatus::Completed;
            session.result = Some(result);
        }
        Ok(session)
    }
}

/// Request to open or resume an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub fingerprint: Fingerprint,
    pub total_size: u64,
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Acknowledgement for an accepted chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub fingerprint: Fingerprint,
    pub index: u64,
    /// Number of distinct indices the session holds after this chunk.
    pub received_chunks: u64,
    pub total_chunks: u64,
}

/// Response body for listing completed files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileInfo>,
}

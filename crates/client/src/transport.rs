//! Request/response seam between the orchestrator and the server.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::upload::{ChunkAck, InitUploadRequest};
use parcel_core::{Fingerprint, SessionView, UploadResult};

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// The four upload operations, however they reach the server.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Open or resume the session for a fingerprint.
    async fn init(&self, req: &InitUploadRequest) -> TransportResult<SessionView>;

    async fn upload_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
        data: Bytes,
    ) -> TransportResult<ChunkAck>;

    async fn status(&self, fingerprint: &Fingerprint) -> TransportResult<SessionView>;

    async fn complete(&self, fingerprint: &Fingerprint) -> TransportResult<UploadResult>;
}

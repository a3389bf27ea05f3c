//! End-to-end upload driver.
//!
//! Hash, open or resume a session, send the chunks the server lacks with
//! bounded parallelism and per-chunk retry, then ask for assembly.

use crate::error::{Result, UploadError};
use crate::progress::{ProgressFn, UploadProgress};
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::UploadTransport;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parcel_core::config::ClientConfig;
use parcel_core::upload::InitUploadRequest;
use parcel_core::{
    ByteSource, ChunkLayout, FileSource, Fingerprint, SessionView, UploadResult, UploadStatus,
    hash_source, read_chunk,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Drives uploads through an [`UploadTransport`].
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn UploadTransport>,
    chunk_size: u64,
    hash_window: usize,
    max_parallel: usize,
    retry: RetryPolicy,
}

fn join_error(err: tokio::task::JoinError) -> UploadError {
    UploadError::Io(std::io::Error::other(format!("worker task failed: {err}")))
}

impl Uploader {
    pub fn new(transport: Arc<dyn UploadTransport>, config: &ClientConfig) -> Result<Self> {
        config.validate().map_err(UploadError::Config)?;
        Ok(Self {
            transport,
            chunk_size: config.chunk_size,
            hash_window: config.hash_window,
            max_parallel: config.max_parallel.max(1),
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Server view of a fingerprint's session, for resume decisions.
    pub async fn resume_status(&self, fingerprint: &Fingerprint) -> Result<SessionView> {
        self.retry
            .run("status", || self.transport.status(fingerprint))
            .await
            .map_err(|e| UploadError::from(e.source))
    }

    /// Upload a file from disk, naming it after the path's file name.
    pub async fn upload_path(
        &self,
        path: &Path,
        mime_type: Option<String>,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<UploadResult> {
        let source = FileSource::open(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.upload(Arc::new(source), file_name, mime_type, on_progress, cancel)
            .await
    }

    /// Upload everything `source` holds and return the server's result.
    ///
    /// Progress is reported as `Hashing` then `Uploading`; within each phase
    /// the percentage never decreases. Cancelling stops dispatch, abandons
    /// in-flight chunks and leaves the server session resumable.
    #[instrument(skip_all, fields(size = source.size(), fingerprint))]
    pub async fn upload(
        &self,
        source: Arc<dyn ByteSource>,
        file_name: Option<String>,
        mime_type: Option<String>,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<UploadResult> {
        let total_size = source.size();
        if total_size == 0 {
            return Err(UploadError::EmptyFile);
        }
        let layout = ChunkLayout::new(total_size, self.chunk_size)?;

        let fingerprint = self
            .fingerprint(source.clone(), on_progress.clone(), &cancel)
            .await?;
        tracing::Span::current().record("fingerprint", tracing::field::display(&fingerprint));

        let req = InitUploadRequest {
            fingerprint,
            total_size,
            chunk_size: self.chunk_size,
            file_name,
            mime_type,
        };
        let view = self
            .retry
            .run("init", || self.transport.init(&req))
            .await
            .map_err(|e| UploadError::from(e.source))?;

        let total = layout.total_chunks();
        if view.status == UploadStatus::Completed {
            tracing::info!("content already uploaded");
        } else {
            let missing = view.missing_chunks();
            let acknowledged = total - missing.len() as u64;
            tracing::info!(
                total_chunks = total,
                missing = missing.len(),
                "session ready"
            );
            on_progress(UploadProgress::uploading(acknowledged, total));
            self.send_missing(
                source,
                layout,
                fingerprint,
                missing,
                acknowledged,
                &on_progress,
                &cancel,
            )
            .await?;
        }

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let result = self
            .retry
            .run("complete", || self.transport.complete(&fingerprint))
            .await
            .map_err(|e| UploadError::from(e.source))?;
        on_progress(UploadProgress::uploading(total, total));
        tracing::info!(file_id = %result.file_id, "upload complete");
        Ok(result)
    }

    /// Hash on a blocking thread. Cancellation abandons the hash.
    async fn fingerprint(
        &self,
        source: Arc<dyn ByteSource>,
        on_progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<Fingerprint> {
        let window = self.hash_window;
        let task = tokio::task::spawn_blocking(move || {
            hash_source(source.as_ref(), window, |percent| {
                on_progress(UploadProgress::Hashing { percent })
            })
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            joined = task => Ok(joined.map_err(join_error)??),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_missing(
        &self,
        source: Arc<dyn ByteSource>,
        layout: ChunkLayout,
        fingerprint: Fingerprint,
        missing: Vec<u64>,
        mut acknowledged: u64,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total = layout.total_chunks();
        let mut pending = missing.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            if cancel.is_cancelled() {
                tracing::info!(in_flight = in_flight.len(), "upload cancelled");
                return Err(UploadError::Cancelled);
            }
            while in_flight.len() < self.max_parallel {
                let Some(index) = pending.next() else {
                    break;
                };
                in_flight.push(self.send_chunk(source.clone(), layout, fingerprint, index));
            }
            if in_flight.is_empty() {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(in_flight = in_flight.len(), "upload cancelled");
                    return Err(UploadError::Cancelled);
                }
                Some(result) = in_flight.next() => {
                    let index = result?;
                    acknowledged += 1;
                    tracing::debug!(index, acknowledged, total, "chunk acknowledged");
                    on_progress(UploadProgress::uploading(acknowledged, total));
                }
            }
        }
    }

    /// Read one chunk by byte range and send it with retry.
    async fn send_chunk(
        &self,
        source: Arc<dyn ByteSource>,
        layout: ChunkLayout,
        fingerprint: Fingerprint,
        index: u64,
    ) -> Result<u64> {
        let chunk = tokio::task::spawn_blocking(move || read_chunk(source.as_ref(), &layout, index))
            .await
            .map_err(join_error)??;
        let data = chunk.data;

        self.retry
            .run("upload_chunk", || {
                self.transport.upload_chunk(&fingerprint, index, data.clone())
            })
            .await
            .map_err(|RetryError { attempts, source }| {
                if source.is_retryable() {
                    UploadError::ChunkFailed {
                        index,
                        attempts,
                        source,
                    }
                } else {
                    UploadError::from(source)
                }
            })?;
        Ok(index)
    }
}

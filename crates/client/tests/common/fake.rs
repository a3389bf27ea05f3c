//! In-process stand-in for the upload server.

use async_trait::async_trait;
use bytes::Bytes;
use parcel_client::{TransportError, TransportResult, UploadTransport};
use parcel_core::upload::{ChunkAck, InitUploadRequest};
use parcel_core::{
    ChunkLayout, FileId, Fingerprint, FingerprintHasher, SessionView, UploadResult, UploadStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct FakeSession {
    layout: ChunkLayout,
    chunks: BTreeMap<u64, Bytes>,
    result: Option<UploadResult>,
}

impl FakeSession {
    fn view(&self, fingerprint: Fingerprint) -> SessionView {
        let status = if self.result.is_some() {
            UploadStatus::Completed
        } else if self.chunks.is_empty() {
            UploadStatus::Initializing
        } else {
            UploadStatus::InProgress
        };
        SessionView {
            fingerprint,
            status,
            total_size: self.layout.total_size(),
            chunk_size: self.layout.chunk_size(),
            total_chunks: self.layout.total_chunks(),
            received_chunk_indices: self.chunks.keys().copied().collect(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    sessions: HashMap<Fingerprint, FakeSession>,
    /// Remaining transient failures per chunk index.
    transient_failures: HashMap<u64, u32>,
    /// Indices that always fail transiently.
    unreachable: HashSet<u64>,
    /// Indices the server rejects outright.
    rejected: HashSet<u64>,
    chunk_attempts: Vec<u64>,
    init_calls: usize,
    complete_calls: usize,
}

/// A [`UploadTransport`] backed by process memory with failure injection.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    chunk_delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_transiently(&self, index: u64, times: u32) {
        self.state
            .lock()
            .unwrap()
            .transient_failures
            .insert(index, times);
    }

    pub fn make_unreachable(&self, index: u64) {
        self.state.lock().unwrap().unreachable.insert(index);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.unreachable.clear();
        state.transient_failures.clear();
        state.rejected.clear();
    }

    pub fn reject(&self, index: u64) {
        self.state.lock().unwrap().rejected.insert(index);
    }

    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock().unwrap() = Some(delay);
    }

    /// Every chunk index sent, including failed attempts, in arrival order.
    pub fn chunk_attempts(&self) -> Vec<u64> {
        self.state.lock().unwrap().chunk_attempts.clone()
    }

    pub fn clear_attempts(&self) {
        self.state.lock().unwrap().chunk_attempts.clear();
    }

    pub fn init_calls(&self) -> usize {
        self.state.lock().unwrap().init_calls
    }

    pub fn complete_calls(&self) -> usize {
        self.state.lock().unwrap().complete_calls
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn received(&self, fingerprint: &Fingerprint) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(fingerprint)
            .map(|s| s.chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    fn not_found(fingerprint: &Fingerprint) -> TransportError {
        TransportError::Rejected {
            status: 404,
            code: "not_found".to_string(),
            message: format!("upload session {fingerprint}"),
            missing: None,
        }
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn init(&self, req: &InitUploadRequest) -> TransportResult<SessionView> {
        let mut state = self.state.lock().unwrap();
        state.init_calls += 1;
        let layout = ChunkLayout::new(req.total_size, req.chunk_size)
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let session = state
            .sessions
            .entry(req.fingerprint)
            .or_insert_with(|| FakeSession {
                layout,
                chunks: BTreeMap::new(),
                result: None,
            });
        if session.layout != layout {
            return Err(TransportError::Rejected {
                status: 409,
                code: "session_conflict".to_string(),
                message: "layout differs".to_string(),
                missing: None,
            });
        }
        Ok(session.view(req.fingerprint))
    }

    async fn upload_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
        data: Bytes,
    ) -> TransportResult<ChunkAck> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.chunk_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.chunk_attempts.push(index);

        if state.unreachable.contains(&index) {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        if let Some(remaining) = state.transient_failures.get_mut(&index)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::Rejected {
                status: 503,
                code: "storage_error".to_string(),
                message: "try again".to_string(),
                missing: None,
            });
        }
        if state.rejected.contains(&index) {
            return Err(TransportError::Rejected {
                status: 400,
                code: "invalid_chunk".to_string(),
                message: format!("chunk {index} rejected"),
                missing: None,
            });
        }

        let session = state
            .sessions
            .get_mut(fingerprint)
            .ok_or_else(|| Self::not_found(fingerprint))?;
        let expected = session
            .layout
            .expected_len(index)
            .map_err(|e| TransportError::Network(e.to_string()))?;
        assert_eq!(data.len() as u64, expected, "chunk {index} has wrong length");
        session.chunks.insert(index, data);

        Ok(ChunkAck {
            fingerprint: *fingerprint,
            index,
            received_chunks: session.chunks.len() as u64,
            total_chunks: session.layout.total_chunks(),
        })
    }

    async fn status(&self, fingerprint: &Fingerprint) -> TransportResult<SessionView> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(fingerprint)
            .map(|s| s.view(*fingerprint))
            .ok_or_else(|| Self::not_found(fingerprint))
    }

    async fn complete(&self, fingerprint: &Fingerprint) -> TransportResult<UploadResult> {
        let mut state = self.state.lock().unwrap();
        state.complete_calls += 1;
        let session = state
            .sessions
            .get_mut(fingerprint)
            .ok_or_else(|| Self::not_found(fingerprint))?;
        if let Some(result) = &session.result {
            return Ok(result.clone());
        }

        let missing: Vec<u64> = (0..session.layout.total_chunks())
            .filter(|i| !session.chunks.contains_key(i))
            .collect();
        if !missing.is_empty() {
            return Err(TransportError::Rejected {
                status: 409,
                code: "incomplete".to_string(),
                message: format!("{} chunks missing", missing.len()),
                missing: Some(missing),
            });
        }

        let mut hasher = FingerprintHasher::new();
        for data in session.chunks.values() {
            hasher.update(data);
        }
        assert_eq!(hasher.finalize(), *fingerprint, "assembled bytes differ");

        let result = UploadResult::new(*fingerprint, FileId::new(), session.layout.total_size());
        session.result = Some(result.clone());
        Ok(result)
    }
}

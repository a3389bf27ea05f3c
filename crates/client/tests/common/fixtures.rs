//! Test fixtures for generating test data.

use bytes::Bytes;
use parcel_client::{ProgressFn, UploadProgress};
use parcel_core::config::ClientConfig;
use std::sync::{Arc, Mutex};

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

/// Client config with small chunks and millisecond backoff.
#[allow(dead_code)]
pub fn test_config(chunk_size: u64) -> ClientConfig {
    ClientConfig {
        chunk_size,
        hash_window: 1024,
        max_parallel: 4,
        max_attempts: 4,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        attempt_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

/// Progress callback that records every event.
#[allow(dead_code)]
pub fn recording_progress() -> (ProgressFn, Arc<Mutex<Vec<UploadProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressFn = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

/// Upload-phase events only.
#[allow(dead_code)]
pub fn uploading_events(events: &[UploadProgress]) -> Vec<(u64, u64, u8)> {
    events
        .iter()
        .filter_map(|event| match *event {
            UploadProgress::Uploading {
                acknowledged,
                total,
                percent,
            } => Some((acknowledged, total, percent)),
            UploadProgress::Hashing { .. } => None,
        })
        .collect()
}

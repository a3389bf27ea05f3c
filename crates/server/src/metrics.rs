//! Prometheus metrics for the Parcel server.
//!
//! The `/metrics` endpoint is unauthenticated so that Prometheus can scrape
//! it. Restrict it at the network level in production.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session lifecycle
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_resumed_total",
        "Total number of init calls that reused an existing session",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_completed_total",
        "Total number of upload sessions assembled and verified",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_failed_total",
        "Total number of upload sessions that failed assembly",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_expired_total",
        "Total number of unfinished upload sessions removed by the sweeper",
    )
    .expect("metric creation failed")
});

// Chunks
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_received_total",
        "Total number of chunk payloads stored",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_DUPLICATE: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_duplicate_total",
        "Total number of chunks received for an index already held",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_bytes_received_total",
        "Total chunk bytes stored",
    )
    .expect("metric creation failed")
});

// Timing
pub static UPLOAD_COMPLETE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_upload_complete_duration_seconds",
            "Time taken to assemble and verify an upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_chunk_upload_duration_seconds",
            "Time taken to store a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_upload_errors_total",
            "Total API errors by error code",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static ACTIVE_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "parcel_tracked_upload_sessions",
        "Current number of upload sessions held in memory",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests may build several routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_CREATED.clone()),
            Box::new(UPLOAD_SESSIONS_RESUMED.clone()),
            Box::new(UPLOAD_SESSIONS_COMPLETED.clone()),
            Box::new(UPLOAD_SESSIONS_FAILED.clone()),
            Box::new(UPLOAD_SESSIONS_EXPIRED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(CHUNKS_DUPLICATE.clone()),
            Box::new(BYTES_RECEIVED.clone()),
            Box::new(UPLOAD_COMPLETE_DURATION.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(ACTIVE_UPLOAD_SESSIONS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

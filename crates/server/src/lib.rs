//! HTTP server for Parcel resumable uploads.
//!
//! This crate provides:
//! - The upload session manager (init, chunk receipt, completion, expiry)
//! - The catalog of completed files with download and delete
//! - The axum router, handlers and Prometheus metrics

pub mod catalog;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod sessions;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use sessions::{InitOutcome, SessionError, SessionManager};
pub use state::AppState;

//! Client side of Parcel uploads.
//!
//! - [`Uploader`] hashes a source, negotiates a session and sends only the
//!   chunks the server is missing, with bounded parallelism and retry.
//! - [`UploadTransport`] is the request/response seam; [`ApiClient`] is its
//!   HTTP implementation.

pub mod api_client;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod transport;

pub use api_client::{ApiClient, HealthResponse};
pub use error::{Result, TransportError, UploadError};
pub use orchestrator::Uploader;
pub use progress::{ProgressFn, UploadProgress, no_progress};
pub use retry::{RetryError, RetryPolicy};
pub use transport::{TransportResult, UploadTransport};

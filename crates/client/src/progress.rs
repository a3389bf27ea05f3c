//! Upload progress events.

use std::sync::Arc;

/// A progress update delivered to the caller's callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadProgress {
    /// Fingerprinting the source.
    Hashing { percent: u8 },
    /// Sending chunks. `acknowledged` counts chunks the server already held
    /// at init as well as those acknowledged since.
    Uploading {
        acknowledged: u64,
        total: u64,
        percent: u8,
    },
}

impl UploadProgress {
    pub fn uploading(acknowledged: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (acknowledged.min(total) * 100 / total) as u8
        };
        Self::Uploading {
            acknowledged,
            total,
            percent,
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            Self::Hashing { percent } | Self::Uploading { percent, .. } => *percent,
        }
    }
}

/// Progress callback shared across the orchestrator's tasks.
pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// A callback that ignores every update.
pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

//! Application state shared across handlers.

use crate::sessions::SessionManager;
use parcel_core::config::AppConfig;
use parcel_storage::{ObjectChunkStore, ObjectRecordStore, ObjectStore};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Upload sessions and the completed-file catalog.
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let chunks = Arc::new(ObjectChunkStore::new(storage.clone()));
        let records = Arc::new(ObjectRecordStore::new(storage.clone()));
        let sessions = Arc::new(SessionManager::new(
            chunks,
            records,
            config.upload.clone(),
        ));
        Self {
            config: Arc::new(config),
            storage,
            sessions,
        }
    }

    /// Spawn the periodic sweep of expired upload sessions.
    ///
    /// Returns `None` when `upload.sweep_interval_secs` is 0.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.upload.sweep_interval()?;
        let sessions = self.sessions.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sessions
                    .sweep_expired(time::OffsetDateTime::now_utc())
                    .await;
                tracing::debug!(removed, "session sweep finished");
            }
        }))
    }
}

//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Upload session limits and lifetimes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Smallest chunk size a client may negotiate.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    /// Largest chunk size a client may negotiate.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Largest file accepted, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Idle time after which an unfinished session expires. Every accepted
    /// chunk restarts the clock.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// How often the expiry sweeper runs. Zero disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_min_chunk_size() -> u64 {
    crate::MIN_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_file_size: default_max_file_size(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl UploadConfig {
    /// Session time-to-live as a Duration.
    pub fn session_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<std::time::Duration> {
        (self.sweep_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.sweep_interval_secs))
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_chunk_size == 0 {
            return Err("upload.min_chunk_size must be greater than 0".to_string());
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(format!(
                "upload.min_chunk_size ({}) exceeds upload.max_chunk_size ({})",
                self.min_chunk_size, self.max_chunk_size
            ));
        }
        if self.max_file_size == 0 {
            return Err("upload.max_file_size must be greater than 0".to_string());
        }
        if self.session_ttl_secs == 0 {
            return Err("upload.session_ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local storage, lost on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Complete server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// In-memory storage and small chunk limits.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Memory,
            upload: UploadConfig {
                min_chunk_size: 1,
                ..UploadConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()
    }
}

/// Client-side upload settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the upload server.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Chunk size proposed at init.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Read window used while fingerprinting.
    #[serde(default = "default_hash_window")]
    pub hash_window: usize,
    /// Maximum chunk uploads in flight.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Attempts per chunk, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout for a single chunk attempt.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_hash_window() -> usize {
    crate::DEFAULT_HASH_WINDOW
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            hash_window: default_hash_window(),
            max_parallel: default_max_parallel(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn initial_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Validate client configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.hash_window == 0 {
            return Err("hash_window must be greater than 0".to_string());
        }
        if self.max_parallel == 0 {
            return Err("max_parallel must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use parcel_core::config::{AppConfig, StorageConfig};
use parcel_server::{AppState, create_router};
use parcel_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary filesystem storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        modifier(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        parcel_server::metrics::register_metrics();
        let state = AppState::new(config, storage);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Drop all in-memory state and start over on the same storage directory,
    /// restoring sessions and the catalog the way `parceld` does at startup.
    pub async fn restart(self) -> Self {
        let config = (*self.state.config).clone();
        let StorageConfig::Filesystem { path } = &config.storage else {
            panic!("restart needs filesystem storage");
        };
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(path)
                .await
                .expect("Failed to reopen storage backend"),
        );

        let state = AppState::new(config, storage);
        state
            .sessions
            .restore()
            .await
            .expect("Failed to restore upload state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: self._temp_dir,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request with an optional JSON body and decode the JSON reply.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let response = self.send(builder.body(body).unwrap()).await;
        decode(response).await
    }

    /// PUT a raw chunk payload.
    pub async fn put_chunk(&self, fingerprint: &str, index: &str, data: &[u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/uploads/{fingerprint}/chunks/{index}"))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(data.to_vec()))
            .unwrap();
        decode(self.send(request).await).await
    }
}

async fn decode(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

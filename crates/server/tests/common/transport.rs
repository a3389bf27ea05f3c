//! Upload transport that drives the router in process.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, header};
use bytes::Bytes;
use parcel_client::{TransportError, TransportResult, UploadTransport};
use parcel_core::upload::{ChunkAck, InitUploadRequest};
use parcel_core::{Fingerprint, SessionView, UploadResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    missing: Option<Vec<u64>>,
}

/// [`UploadTransport`] over `Router::oneshot`.
#[allow(dead_code)]
#[derive(Clone)]
pub struct RouterTransport {
    router: axum::Router,
}

#[allow(dead_code)]
impl RouterTransport {
    pub fn new(router: axum::Router) -> Self {
        Self { router }
    }

    async fn call<T: DeserializeOwned>(&self, request: Request<Body>) -> TransportResult<T> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| TransportError::InvalidResponse(e.to_string()));
        }
        let err: ErrorBody = serde_json::from_slice(&body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Err(TransportError::Rejected {
            status: status.as_u16(),
            code: err.code,
            message: err.message,
            missing: err.missing,
        })
    }
}

#[async_trait]
impl UploadTransport for RouterTransport {
    async fn init(&self, req: &InitUploadRequest) -> TransportResult<SessionView> {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/uploads")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(req).unwrap()))
            .unwrap();
        self.call(request).await
    }

    async fn upload_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
        data: Bytes,
    ) -> TransportResult<ChunkAck> {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/uploads/{fingerprint}/chunks/{index}"))
            .body(Body::from(data))
            .unwrap();
        self.call(request).await
    }

    async fn status(&self, fingerprint: &Fingerprint) -> TransportResult<SessionView> {
        let request = Request::builder()
            .uri(format!("/v1/uploads/{fingerprint}"))
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }

    async fn complete(&self, fingerprint: &Fingerprint) -> TransportResult<UploadResult> {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/v1/uploads/{fingerprint}/complete"))
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }
}

//! HTTP implementation of [`UploadTransport`].

use crate::error::{TransportError, UploadError};
use crate::transport::{TransportResult, UploadTransport};
use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::upload::{ChunkAck, InitUploadRequest, ListFilesResponse};
use parcel_core::{FileId, FileInfo, Fingerprint, SessionView, UploadResult};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    missing: Option<Vec<u64>>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| UploadError::Config(format!("invalid server URL {base_url}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> TransportResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::InvalidResponse(format!("failed to build URL: {e}")))
    }

    /// Turn a non-2xx response into [`TransportError::Rejected`].
    async fn check(response: reqwest::Response) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (code, message, missing) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => (err.code, err.message, err.missing),
            Err(_) => (format!("http_{}", status.as_u16()), body, None),
        };
        Err(TransportError::Rejected {
            status: status.as_u16(),
            code,
            message,
            missing,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> TransportResult<T> {
        let response = Self::check(req.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn health(&self) -> TransportResult<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn list_files(&self) -> TransportResult<Vec<FileInfo>> {
        let url = self.url("/v1/files")?;
        let response: ListFilesResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.files)
    }

    /// Stream a completed file into `writer`. Returns the number of bytes written.
    pub async fn download_to<W>(&self, file_id: &FileId, writer: &mut W) -> TransportResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let url = self.url(&format!("/v1/files/{file_id}"))?;
        let mut response = Self::check(self.http.get(url).send().await?).await?;

        let mut written = 0u64;
        while let Some(piece) = response.chunk().await? {
            writer
                .write_all(&piece)
                .await
                .map_err(|e| TransportError::Network(format!("failed to write download: {e}")))?;
            written += piece.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Network(format!("failed to write download: {e}")))?;
        Ok(written)
    }

    pub async fn delete_file(&self, file_id: &FileId) -> TransportResult<()> {
        let url = self.url(&format!("/v1/files/{file_id}"))?;
        Self::check(self.http.delete(url).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for ApiClient {
    async fn init(&self, req: &InitUploadRequest) -> TransportResult<SessionView> {
        let url = self.url("/v1/uploads")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    async fn upload_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: u64,
        data: Bytes,
    ) -> TransportResult<ChunkAck> {
        let url = self.url(&format!("/v1/uploads/{fingerprint}/chunks/{index}"))?;
        self.send_json(
            self.http
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
        )
        .await
    }

    async fn status(&self, fingerprint: &Fingerprint) -> TransportResult<SessionView> {
        let url = self.url(&format!("/v1/uploads/{fingerprint}"))?;
        self.send_json(self.http.get(url)).await
    }

    async fn complete(&self, fingerprint: &Fingerprint) -> TransportResult<UploadResult> {
        let url = self.url(&format!("/v1/uploads/{fingerprint}/complete"))?;
        self.send_json(self.http.post(url)).await
    }
}

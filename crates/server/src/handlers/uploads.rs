//! Upload session handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use parcel_core::upload::{ChunkAck, InitUploadRequest};
use parcel_core::{Fingerprint, SessionView, UploadResult};

/// Maximum request body size for init requests.
const MAX_INIT_BODY_SIZE: usize = 64 * 1024;

/// Slack on top of `max_chunk_size` so an oversized chunk is reported as a
/// length mismatch rather than a truncated read.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

fn parse_fingerprint(raw: &str) -> ApiResult<Fingerprint> {
    Ok(Fingerprint::from_hex(raw)?)
}

/// POST /v1/uploads - Create or resume an upload session.
#[tracing::instrument(skip(state, req), fields(fingerprint))]
pub async fn init_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let body: InitUploadRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_INIT_BODY_SIZE)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON: {e}")))?
    };
    tracing::Span::current().record("fingerprint", tracing::field::display(&body.fingerprint));

    let outcome = state.sessions.init(body).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.view)))
}

/// GET /v1/uploads/{fingerprint} - Query session state.
#[tracing::instrument(skip(state), fields(fingerprint = %fingerprint))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    Ok(Json(state.sessions.status(&fingerprint).await?))
}

/// PUT /v1/uploads/{fingerprint}/chunks/{index} - Upload one chunk.
#[tracing::instrument(skip(state, req), fields(fingerprint = %fingerprint, index = %index))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((fingerprint, index)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ChunkAck>> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let index: u64 = index
        .parse()
        .map_err(|_| ApiError::InvalidChunk(format!("invalid chunk index: {index}")))?;

    let limit = usize::try_from(state.config.upload.max_chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(CHUNK_UPLOAD_BUFFER);
    let data = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::InvalidChunk(format!("failed to read chunk: {e}")))?;

    let ack = state
        .sessions
        .receive_chunk(&fingerprint, index, data)
        .await?;
    Ok(Json(ack))
}

/// POST /v1/uploads/{fingerprint}/complete - Assemble and verify the file.
#[tracing::instrument(skip(state), fields(fingerprint = %fingerprint))]
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<UploadResult>> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    Ok(Json(state.sessions.complete(&fingerprint).await?))
}

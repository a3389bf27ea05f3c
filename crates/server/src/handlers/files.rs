//! Completed file handlers.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use parcel_core::FileId;
use parcel_core::upload::ListFilesResponse;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Quote-safe ASCII rendition of a file name for `Content-Disposition`.
fn disposition_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

/// GET /v1/files - List completed files.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<ListFilesResponse>> {
    Ok(Json(ListFilesResponse {
        files: state.sessions.list_files(),
    }))
}

/// GET /v1/files/{file_id} - Stream an assembled file.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let file_id = FileId::parse(&file_id)?;
    let (info, stream) = state.sessions.open_file(&file_id).await?;

    let content_type = info
        .mime_type
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let file_name = info
        .file_name
        .as_deref()
        .map(disposition_name)
        .unwrap_or_else(|| info.fingerprint.to_hex());
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, info.size.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// DELETE /v1/files/{file_id} - Delete a completed file.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<StatusCode> {
    let file_id = FileId::parse(&file_id)?;
    state.sessions.delete_file(&file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

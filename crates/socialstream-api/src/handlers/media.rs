//! Media item routes: upload, listing, bytes, metadata and delete.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use socialstream_core::models::MediaRecord;
use std::sync::Arc;

use super::{read_file_field, serve_bytes};
use crate::constants::{CACHE_CONTROL_COMPRESSED, CACHE_CONTROL_UNCOMPRESSED, UPLOAD_FIELD};
use crate::error::HttpAppError;
use crate::extractors::Caller;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaIdResponse {
    pub media_id: i32,
}

/// Upload a new media item owned by the caller.
///
/// Returns `201 {mediaId}` once the row is committed, the full blob is
/// written and `media.uploaded` is published.
#[tracing::instrument(skip(state, multipart), fields(owner_id = caller.0, operation = "upload_media"))]
pub async fn upload_media(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let content = read_file_field(&mut multipart, UPLOAD_FIELD).await?;
    let record = state.coordinator.upload(caller.0, content).await?;

    Ok((
        StatusCode::CREATED,
        Json(MediaIdResponse {
            media_id: record.media_id,
        }),
    ))
}

pub async fn list_media(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MediaRecord>>, HttpAppError> {
    Ok(Json(state.coordinator.list_media().await?))
}

/// Serve the compressed bytes once available, the full bytes before.
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<i32>,
) -> Result<Response, HttpAppError> {
    let media = state.coordinator.get_media(media_id).await?;
    let cache_control = if media.compressed {
        CACHE_CONTROL_COMPRESSED
    } else {
        CACHE_CONTROL_UNCOMPRESSED
    };
    Ok(serve_bytes(media, cache_control))
}

pub async fn get_media_metadata(
    State(state): State<Arc<AppState>>,
    Path(media_id): Path<i32>,
) -> Result<Json<MediaRecord>, HttpAppError> {
    Ok(Json(state.coordinator.get_media_record(media_id).await?))
}

/// Delete a media item the caller owns. `409` with `Retry-After` while it is
/// still being compressed.
#[tracing::instrument(skip(state), fields(caller_id = caller.0, operation = "delete_media"))]
pub async fn delete_media(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(media_id): Path<i32>,
) -> Result<StatusCode, HttpAppError> {
    state
        .coordinator
        .delete_media(media_id, Some(caller.0))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

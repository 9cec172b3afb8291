//! Profile image routes, resolved through the identity service pointer.

use axum::{
    extract::{Multipart, Path, State},
    response::Response,
    Json,
};
use socialstream_core::AppError;
use std::sync::Arc;

use super::media::MediaIdResponse;
use super::{read_file_field, serve_bytes};
use crate::constants::{CACHE_CONTROL_PROFILE, PROFILE_IMAGE_FIELD};
use crate::error::HttpAppError;
use crate::extractors::Caller;
use crate::state::AppState;

pub async fn get_profile_image(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Response, HttpAppError> {
    let media = state.coordinator.get_user_profile_image(user_id).await?;
    Ok(serve_bytes(media, CACHE_CONTROL_PROFILE))
}

/// Replace the caller's own profile image.
#[tracing::instrument(skip(state, multipart), fields(caller_id = caller.0, operation = "replace_profile_image"))]
pub async fn replace_profile_image(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<i32>,
    mut multipart: Multipart,
) -> Result<Json<MediaIdResponse>, HttpAppError> {
    if caller.0 != user_id {
        return Err(AppError::Unauthorized(format!(
            "User {} cannot change the profile image of user {}",
            caller.0, user_id
        ))
        .into());
    }

    let content = read_file_field(&mut multipart, PROFILE_IMAGE_FIELD).await?;
    let record = state
        .coordinator
        .replace_profile_image(user_id, content)
        .await?;

    Ok(Json(MediaIdResponse {
        media_id: record.media_id,
    }))
}

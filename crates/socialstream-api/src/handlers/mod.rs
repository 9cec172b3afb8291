//! HTTP handlers. Each one is a thin translation onto the coordinator.

pub mod health;
pub mod media;
pub mod profile;

use axum::{
    extract::Multipart,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use socialstream_core::AppError;
use socialstream_services::{MediaContent, ServedMedia};

use crate::error::HttpAppError;

/// Read exactly one file part named `field_name`.
///
/// The declared content type wins; parts without one are rejected by the
/// validator as `application/octet-stream`. A part `Content-Length`, when
/// sent, is checked against the bytes received.
async fn read_file_field(
    multipart: &mut Multipart,
    field_name: &str,
) -> Result<MediaContent, HttpAppError> {
    let mut content: Option<MediaContent> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        if content.is_some() {
            return Err(AppError::InvalidInput(format!(
                "Multiple '{}' fields are not allowed; send exactly one",
                field_name
            ))
            .into());
        }

        let content_type = field
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let declared_length = declared_length(field.headers())?;
        let data = field.bytes().await?;
        let mut media = MediaContent::new(data, content_type);
        if let Some(length) = declared_length {
            media.content_length = length;
        }
        content = Some(media);
    }

    content.ok_or_else(|| AppError::InvalidInput(format!("No '{}' field provided", field_name)).into())
}

fn declared_length(headers: &HeaderMap) -> Result<Option<usize>, AppError> {
    let Some(value) = headers.get(header::CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| AppError::InvalidInput("Invalid Content-Length on file part".to_string()))
}

/// Bytes plus the headers that let caches and clients reuse them.
fn serve_bytes(media: ServedMedia, cache_control: &'static str) -> Response {
    let mut response = (StatusCode::OK, media.data).into_response();
    let headers = response.headers_mut();

    if let Ok(content_type) = HeaderValue::from_str(&media.content_type) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", media.external_id)) {
        headers.insert(header::ETAG, etag);
    }
    response
}

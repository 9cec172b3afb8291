//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use socialstream_core::constants::CALLER_USER_ID_HEADER;
use socialstream_core::AppError;

use crate::error::HttpAppError;

/// Authenticated caller, as asserted by the gateway through `X-User-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub i32);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(CALLER_USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("Missing {} header", CALLER_USER_ID_HEADER))
        })?;

        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .filter(|id| *id > 0)
            .map(Caller)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "{} must be a positive integer",
                    CALLER_USER_ID_HEADER
                ))
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<Caller, HttpAppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(CALLER_USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_parsed_from_header() {
        assert_eq!(extract(Some("42")).await.unwrap(), Caller(42));
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let HttpAppError(err) = extract(None).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_malformed_header_is_bad_request() {
        for raw in ["abc", "-3", "0"] {
            let HttpAppError(err) = extract(Some(raw)).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{}", raw);
        }
    }
}

//! Event handler error classification
//!
//! Consumers decide between acknowledging, requeueing and dropping a delivery
//! based on whether the handler failure is worth retrying.

use std::fmt;

use crate::error::{AppError, ErrorMetadata};

/// Failure returned by an event handler.
///
/// Recoverable failures are requeued until the delivery exceeds the poison
/// age threshold. Unrecoverable failures (undecodable payloads, unknown
/// routing keys) are dropped on first sight.
#[derive(Debug)]
pub struct HandlerError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl HandlerError {
    /// A failure that redelivery cannot fix.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// A transient failure: blob store hiccup, lock contention, timeout.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    /// Payload that cannot be decoded into the expected message shape.
    pub fn malformed(routing_key: &str, err: serde_json::Error) -> Self {
        Self::unrecoverable(anyhow::anyhow!(
            "Malformed payload for routing key {}: {}",
            routing_key,
            err
        ))
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for HandlerError {
    /// Plain errors default to recoverable
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

impl From<AppError> for HandlerError {
    /// Follows the error's own retry metadata, so `NotReady`, timeouts and
    /// upstream failures are requeued while validation errors are dropped.
    fn from(err: AppError) -> Self {
        let recoverable = err.is_recoverable();
        Self {
            inner: anyhow::Error::new(err),
            recoverable,
        }
    }
}

/// Extension trait for marking a result's error as unrecoverable
pub trait HandlerResultExt<T> {
    fn unrecoverable(self) -> Result<T, HandlerError>;
}

impl<T, E: Into<anyhow::Error>> HandlerResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, HandlerError> {
        self.map_err(|e| HandlerError::unrecoverable(e.into()))
    }
}

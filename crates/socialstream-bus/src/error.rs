use socialstream_core::AppError;
use thiserror::Error;

/// Event bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(i64),

    #[error("Invalid binding pattern: {0}")]
    InvalidPattern(String),

    #[error("Payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type BusResult<T> = Result<T, BusError>;

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        AppError::upstream("event bus", err.to_string())
    }
}

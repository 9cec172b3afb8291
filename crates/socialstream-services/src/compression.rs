//! Compression state machine
//!
//! `started -> complete`, driven by `media.compressed`. The transition itself
//! is a conditional update in the metadata store. There is no failure state:
//! a record whose compressor never reports stays `started` and cannot be
//! deleted.

use socialstream_core::models::{CompressionStatus, MediaRecord};
use socialstream_core::AppError;
use uuid::Uuid;

pub struct CompressionStateMachine;

impl CompressionStateMachine {
    /// Blob id to serve: the compressed variant once it exists, the full one
    /// before.
    pub fn servable_id(record: &MediaRecord) -> Uuid {
        match record.compression_status {
            CompressionStatus::Complete => record.external_id_compressed,
            CompressionStatus::Started => record.external_id_full,
        }
    }

    pub fn ensure_deletable(media_id: i32, status: CompressionStatus) -> Result<(), AppError> {
        match status {
            CompressionStatus::Complete => Ok(()),
            CompressionStatus::Started => Err(AppError::NotReady(format!(
                "Media {} is still being compressed",
                media_id
            ))),
        }
    }
}

//! Blob store abstraction trait
//!
//! This module defines the BlobStore trait that all backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use socialstream_core::AppError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Blob {} not found", key)),
            other => AppError::upstream("blob store", other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Bytes of a stored blob.
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub data: Bytes,
    /// Content type recorded by the backend, when it keeps one.
    pub content_type: Option<String>,
}

/// Blob store abstraction
///
/// Objects are immutable once written; a key is never overwritten with
/// different content by the media service.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<BlobInfo>;

    /// Read an object. Missing objects yield `StorageError::NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<BlobObject>;

    /// Remove an object. Removing a missing object succeeds.
    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Whether an object exists.
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

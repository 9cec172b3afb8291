//! Shared key handling for blob store backends.

use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Object key for an external id. The hyphenated lowercase form is the only
/// representation written to any backend.
pub fn blob_key(external_id: Uuid) -> String {
    external_id.to_string()
}

/// Reject keys that could escape a bucket.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reject bucket names that are not a single safe path segment.
pub fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty()
        || !bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
        || bucket.contains("..")
    {
        return Err(StorageError::InvalidKey(format!("bucket {}", bucket)));
    }
    Ok(())
}

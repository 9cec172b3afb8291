use crate::keys::{validate_bucket, validate_key};
use crate::traits::{BlobInfo, BlobObject, BlobStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type Objects = HashMap<(String, String), (Bytes, String)>;

/// In-process blob store for tests and local wiring.
///
/// Reports itself as the local backend.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<Objects>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> StorageResult<MutexGuard<'_, Objects>> {
        self.objects
            .lock()
            .map_err(|_| StorageError::BackendError("memory blob store poisoned".to_string()))
    }

    /// Keys currently stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<BlobInfo> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let size = data.len() as u64;
        self.objects()?.insert(
            (bucket.to_string(), key.to_string()),
            (data, content_type.to_string()),
        );
        Ok(BlobInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<BlobObject> {
        self.objects()?
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(data, content_type)| BlobObject {
                data: data.clone(),
                content_type: Some(content_type.clone()),
            })
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.objects()?
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .objects()?
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_keeps_content_type() {
        let store = MemoryBlobStore::new();
        store
            .put("media", "a", Bytes::from_static(b"1"), "image/png")
            .await
            .unwrap();
        let object = store.get("media", "a").await.unwrap();
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
        assert_eq!(store.keys("media"), vec!["a".to_string()]);
        assert!(store.keys("other").is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_remove_is_idempotent() {
        let store = MemoryBlobStore::new();
        store.remove("media", "missing").await.unwrap();
        store
            .put("media", "a", Bytes::from_static(b"1"), "image/png")
            .await
            .unwrap();
        store.remove("media", "a").await.unwrap();
        store.remove("media", "a").await.unwrap();
        assert!(store.is_empty());
    }
}

//! Test helpers: in-memory wiring of the coordinator and a blob store that
//! fails or stalls on demand.
//!
//! Run from workspace root: `cargo test -p socialstream-services`.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use socialstream_bus::{Delivery, EventSource, MemoryEventBus};
use socialstream_core::constants::{MEDIA_SERVICE_BINDINGS, MEDIA_SERVICE_QUEUE};
use socialstream_core::models::{CompressionStatus, MediaRecord};
use socialstream_core::validation::UploadValidator;
use socialstream_core::LifecycleTimeouts;
use socialstream_db::MemoryMetadataStore;
use socialstream_services::{MediaContent, MediaLifecycleCoordinator, MemoryProfilePointers};
use socialstream_storage::{
    BlobInfo, BlobObject, BlobStore, MemoryBlobStore, StorageBackend, StorageError, StorageResult,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const BUCKET: &str = "media";
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Blob store wrapper with switchable failures and latency.
#[derive(Default)]
pub struct FaultyBlobStore {
    pub inner: MemoryBlobStore,
    fail_put: AtomicBool,
    fail_remove: AtomicBool,
    put_delay_ms: AtomicU64,
    remove_delay_ms: AtomicU64,
}

impl FaultyBlobStore {
    pub fn set_put_failure(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn set_remove_failure(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_remove_delay(&self, delay: Duration) {
        self.remove_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn contains(&self, external_id: Uuid) -> bool {
        self.inner
            .keys(BUCKET)
            .contains(&external_id.to_string())
    }

    async fn stall(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<BlobInfo> {
        Self::stall(&self.put_delay_ms).await;
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected put failure".to_string()));
        }
        self.inner.put(bucket, key, data, content_type).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<BlobObject> {
        self.inner.get(bucket, key).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> StorageResult<()> {
        Self::stall(&self.remove_delay_ms).await;
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(
                "injected remove failure".to_string(),
            ));
        }
        self.inner.remove(bucket, key).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.inner.stat(bucket, key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

/// Coordinator over in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub metadata: MemoryMetadataStore,
    pub blobs: Arc<FaultyBlobStore>,
    pub bus: Arc<MemoryEventBus>,
    pub pointers: Arc<MemoryProfilePointers>,
    pub coordinator: Arc<MediaLifecycleCoordinator>,
}

pub async fn harness() -> Harness {
    harness_with(LifecycleTimeouts::default()).await
}

pub async fn harness_with(timeouts: LifecycleTimeouts) -> Harness {
    let metadata = MemoryMetadataStore::new();
    let blobs = Arc::new(FaultyBlobStore::default());
    let bus = Arc::new(MemoryEventBus::new());
    let pointers = Arc::new(MemoryProfilePointers::new());

    bus.declare_queue(MEDIA_SERVICE_QUEUE, &MEDIA_SERVICE_BINDINGS)
        .await
        .unwrap();

    let coordinator = Arc::new(MediaLifecycleCoordinator::new(
        Arc::new(metadata.clone()),
        blobs.clone(),
        bus.clone(),
        pointers.clone(),
        BUCKET,
        timeouts,
        UploadValidator::new(
            MAX_FILE_SIZE,
            vec!["image/jpeg".to_string(), "image/png".to_string()],
        ),
    ));

    Harness {
        metadata,
        blobs,
        bus,
        pointers,
        coordinator,
    }
}

/// `size` bytes starting with a JPEG SOI marker.
pub fn jpeg(size: usize) -> MediaContent {
    let mut data = vec![0u8; size];
    if size >= 3 {
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    }
    MediaContent::new(Bytes::from(data), "image/jpeg")
}

/// A delivery as the consumer would hand it to a handler.
pub fn delivery(routing_key: &str, payload: serde_json::Value) -> Delivery {
    Delivery {
        id: 1,
        queue: MEDIA_SERVICE_QUEUE.to_string(),
        routing_key: routing_key.to_string(),
        payload: Bytes::from(serde_json::to_vec(&payload).unwrap()),
        published_at: Utc::now(),
        delivery_count: 1,
    }
}

impl Harness {
    /// External ids announced through `media.externalId.deleted`.
    pub fn deleted_external_ids(&self) -> Vec<Uuid> {
        self.bus
            .published_json("media.externalId.deleted")
            .into_iter()
            .filter_map(|payload| {
                payload["externalId"]
                    .as_str()
                    .and_then(|id| id.parse().ok())
            })
            .collect()
    }

    pub async fn record(&self, media_id: i32) -> Option<MediaRecord> {
        self.coordinator.get_media_record(media_id).await.ok()
    }

    pub async fn status(&self, media_id: i32) -> Option<CompressionStatus> {
        self.record(media_id)
            .await
            .map(|record| record.compression_status)
    }

    /// Write the compressed variant the way the compressor would.
    pub async fn write_compressed_blob(&self, record: &MediaRecord) {
        self.blobs
            .inner
            .put(
                BUCKET,
                &record.external_id_compressed.to_string(),
                Bytes::from_static(b"compressed"),
                &record.content_type,
            )
            .await
            .unwrap();
    }
}

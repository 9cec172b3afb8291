//! Media lifecycle coordinator
//!
//! Keeps the metadata store, the blob store and the event bus consistent
//! across upload, replace and delete. Each write opens a metadata
//! transaction, runs its blob/bus/RPC side effects on a separate task raced
//! against the operation budget, and commits only if the side effects
//! finished in time. Ids whose fate is uncertain are recorded in the pending
//! registry before anything touches the blob store.

mod consume;
mod read;
mod write;

pub use consume::OrphanRemoval;
pub use read::ServedMedia;

use bytes::Bytes;
use socialstream_bus::{publish_event, EventPublisher};
use socialstream_core::models::{ExternalIdDeleted, ExternalIds, PendingOperationKind};
use socialstream_core::validation::UploadValidator;
use socialstream_core::{AppError, LifecycleTimeouts};
use socialstream_db::{MetadataStore, MetadataTx};
use socialstream_storage::BlobStore;
use std::sync::Arc;
use uuid::Uuid;

use crate::profile_pointer::ProfilePointerClient;
use crate::race::race;

/// Bytes of an upload together with what the client declared about them.
#[derive(Debug, Clone)]
pub struct MediaContent {
    pub data: Bytes,
    pub content_type: String,
    pub content_length: usize,
}

impl MediaContent {
    /// Content whose declared length is the actual byte count.
    pub fn new(data: Bytes, content_type: impl Into<String>) -> Self {
        let content_length = data.len();
        Self {
            data,
            content_type: content_type.into(),
            content_length,
        }
    }
}

pub struct MediaLifecycleCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventPublisher>,
    pointers: Arc<dyn ProfilePointerClient>,
    bucket: String,
    timeouts: LifecycleTimeouts,
    validator: UploadValidator,
}

impl MediaLifecycleCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<dyn EventPublisher>,
        pointers: Arc<dyn ProfilePointerClient>,
        bucket: impl Into<String>,
        timeouts: LifecycleTimeouts,
        validator: UploadValidator,
    ) -> Self {
        Self {
            metadata,
            blobs,
            events,
            pointers,
            bucket: bucket.into(),
            timeouts,
            validator,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn timeouts(&self) -> LifecycleTimeouts {
        self.timeouts
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Publish `media.externalId.deleted` for one id within the compensation
    /// budget.
    async fn announce_orphan(&self, external_id: Uuid) -> Result<(), AppError> {
        let events = self.events.clone();
        race(
            "orphan announcement",
            self.timeouts.compensation,
            async move {
                Ok::<_, AppError>(
                    publish_event(events.as_ref(), &ExternalIdDeleted { external_id }).await?,
                )
            },
        )
        .await
    }

    /// Clean up after a write that never became visible. Its pending rows
    /// stay in place as the backstop. When `media.uploaded` may have gone
    /// out, the compressor can still write the compressed variant, so that
    /// id is kept registered until the compressor deadline.
    async fn abandon(&self, ids: ExternalIds, announced: bool) {
        if announced {
            self.register_superseded(ids.compressed).await;
        }
        for external_id in ids.as_array() {
            if let Err(e) = self.announce_orphan(external_id).await {
                tracing::warn!(
                    external_id = %external_id,
                    error = %e,
                    "Failed to publish orphan deletion, left to reconciliation"
                );
            }
        }
    }

    /// Keep a compressed id whose compressor has not reported under watch of
    /// the sweep.
    async fn register_superseded(&self, external_id: Uuid) {
        if let Err(e) = self
            .metadata
            .register_pending(PendingOperationKind::Superseded, &self.bucket, &[external_id])
            .await
        {
            tracing::error!(
                external_id = %external_id,
                error = %e,
                "Failed to register superseded compressed id, a late compressor write may leak"
            );
        }
    }

    /// Hand blobs that no record references any more to the orphan consumer.
    /// Ids that cannot be published in time are registered for
    /// reconciliation.
    async fn reclaim(&self, external_ids: &[Uuid]) {
        let mut unpublished = Vec::new();
        for &external_id in external_ids {
            if let Err(e) = self.announce_orphan(external_id).await {
                tracing::warn!(
                    external_id = %external_id,
                    error = %e,
                    "Failed to publish blob reclamation, registering pending reclaim"
                );
                unpublished.push(external_id);
            }
        }

        if unpublished.is_empty() {
            return;
        }
        if let Err(e) = self
            .metadata
            .register_pending(PendingOperationKind::Reclaim, &self.bucket, &unpublished)
            .await
        {
            tracing::error!(
                external_ids = ?unpublished,
                error = %e,
                "Failed to register pending reclaim, blobs may leak"
            );
        }
    }

    async fn clear_pending(&self, kind: PendingOperationKind, external_ids: &[Uuid]) {
        if let Err(e) = self.metadata.clear_pending(kind, external_ids).await {
            // A leftover row is harmless: the sweep sees the id is referenced.
            tracing::warn!(kind = %kind, error = %e, "Failed to clear pending blob operations");
        }
    }
}

/// Roll back `tx` and hand back the error that caused it.
async fn abort(tx: Box<dyn MetadataTx>, err: AppError) -> AppError {
    if let Err(rollback_err) = tx.rollback().await {
        tracing::error!(error = %rollback_err, "Rollback failed");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_content_length_defaults_to_byte_count() {
        let content = MediaContent::new(Bytes::from_static(b"abc"), "image/png");
        assert_eq!(content.content_length, 3);
        assert_eq!(content.content_type, "image/png");
    }
}

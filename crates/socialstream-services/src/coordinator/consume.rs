use socialstream_core::models::{MediaCompressed, PendingOperationKind};
use socialstream_core::AppError;
use socialstream_db::CompressionUpdate;
use socialstream_storage::keys::blob_key;
use uuid::Uuid;

use super::MediaLifecycleCoordinator;
use crate::race::race;

/// Result of an orphan blob deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanRemoval {
    Removed,
    /// A live record still points at the blob.
    StillReferenced,
}

/// Registry kinds an orphan deletion settles. A superseded compressed id is
/// not among them: its compressor may write it after the removal.
const ORPHAN_SETTLES: [PendingOperationKind; 3] = [
    PendingOperationKind::Reclaim,
    PendingOperationKind::Upload,
    PendingOperationKind::Replace,
];

const ALL_KINDS: [PendingOperationKind; 4] = [
    PendingOperationKind::Reclaim,
    PendingOperationKind::Upload,
    PendingOperationKind::Replace,
    PendingOperationKind::Superseded,
];

impl MediaLifecycleCoordinator {
    /// Apply `media.compressed`.
    ///
    /// Redeliveries and stale events are reported, not treated as failures.
    /// An event for a record that is not visible yet fails with `NotReady`
    /// while the write that announced it may still commit, so the consumer
    /// redelivers it.
    #[tracing::instrument(skip(self, event), fields(media_id = event.media_id))]
    pub async fn on_compression_complete(
        &self,
        event: &MediaCompressed,
    ) -> Result<CompressionUpdate, AppError> {
        // The store waits out a transaction holding the record, so a rotation
        // in flight is seen once it settles.
        let update = self
            .metadata
            .mark_compression_complete(event.media_id, event.external_id_compressed)
            .await?;

        match update {
            CompressionUpdate::Applied => tracing::info!("Compression complete"),
            CompressionUpdate::AlreadyComplete => {
                tracing::debug!("Compression already complete, redelivery ignored")
            }
            CompressionUpdate::Stale => {
                tracing::info!(
                    external_id = ?event.external_id_compressed,
                    "Compression event targets a rotated blob, discarding the variant"
                );
                if let Some(external_id) = event.external_id_compressed {
                    self.discard_late_variant(external_id).await?;
                }
            }
            CompressionUpdate::Missing => {
                self.ensure_write_settled(event).await?;
                tracing::info!("Compression event for unknown media, ignoring");
            }
        }
        Ok(update)
    }

    /// Remove a blob no record should reference, within the consumer budget.
    /// An absent blob counts as removed.
    #[tracing::instrument(skip(self))]
    pub async fn on_orphan_blob_deleted(
        &self,
        external_id: Uuid,
    ) -> Result<OrphanRemoval, AppError> {
        self.remove_unreferenced(external_id, &ORPHAN_SETTLES).await
    }

    /// `Missing` is final only once no write that could create the record
    /// is still pending.
    async fn ensure_write_settled(&self, event: &MediaCompressed) -> Result<(), AppError> {
        let not_visible = || {
            AppError::NotReady(format!(
                "Media {} is not visible yet, compression event deferred",
                event.media_id
            ))
        };

        let Some(external_id) = event.external_id_compressed else {
            return Err(not_visible());
        };

        let kinds = self.metadata.pending_kinds(external_id).await?;
        if kinds.contains(&PendingOperationKind::Superseded) {
            // The write was abandoned; the variant belongs to no record.
            self.discard_late_variant(external_id).await
        } else if kinds
            .iter()
            .any(|kind| matches!(kind, PendingOperationKind::Upload | PendingOperationKind::Replace))
        {
            Err(not_visible())
        } else {
            Ok(())
        }
    }

    /// The compressor reported, so the variant exists now and can be removed
    /// for good.
    async fn discard_late_variant(&self, external_id: Uuid) -> Result<(), AppError> {
        self.remove_unreferenced(external_id, &ALL_KINDS).await?;
        Ok(())
    }

    async fn remove_unreferenced(
        &self,
        external_id: Uuid,
        settles: &[PendingOperationKind],
    ) -> Result<OrphanRemoval, AppError> {
        if self.metadata.is_external_id_referenced(external_id).await? {
            tracing::warn!(external_id = %external_id, "Blob is still referenced, skipping removal");
            return Ok(OrphanRemoval::StillReferenced);
        }

        let blobs = self.blobs.clone();
        let bucket = self.bucket.clone();
        race(
            "orphan blob removal",
            self.timeouts.consumer_removal,
            async move { Ok::<_, AppError>(blobs.remove(&bucket, &blob_key(external_id)).await?) },
        )
        .await?;

        for &kind in settles {
            self.clear_pending(kind, &[external_id]).await;
        }

        tracing::info!(external_id = %external_id, "Orphan blob removed");
        Ok(OrphanRemoval::Removed)
    }
}

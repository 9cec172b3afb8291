use socialstream_bus::publish_event;
use socialstream_core::models::{
    CompressionStatus, ExternalIds, MediaRecord, MediaUploaded, NewMedia, PendingOperationKind,
};
use socialstream_core::AppError;
use socialstream_db::IsolationLevel;
use socialstream_storage::keys::blob_key;
use std::time::Instant;
use uuid::Uuid;

use super::{abort, MediaContent, MediaLifecycleCoordinator};
use crate::compression::CompressionStateMachine;
use crate::race::race;

impl MediaLifecycleCoordinator {
    /// Store new media for `owner_id`.
    ///
    /// The record becomes visible only once the full blob is written and
    /// `media.uploaded` is published. Any reported failure leaves no row.
    #[tracing::instrument(skip(self, content), fields(media_id))]
    pub async fn upload(
        &self,
        owner_id: i32,
        content: MediaContent,
    ) -> Result<MediaRecord, AppError> {
        let started = Instant::now();
        self.validator.validate(
            &content.data,
            &content.content_type,
            content.content_length,
        )?;

        let ids = ExternalIds::generate();
        self.metadata
            .register_pending(PendingOperationKind::Upload, &self.bucket, &ids.as_array())
            .await?;

        let mut tx = self.metadata.begin(IsolationLevel::ReadCommitted).await?;
        let record = match tx
            .create_media(&NewMedia {
                owner_id,
                external_ids: ids,
                content_type: content.content_type.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => return Err(abort(tx, e).await),
        };
        tracing::Span::current().record("media_id", record.media_id);

        let side_effect = self.store_and_announce(&record, content, None);
        if let Err(e) = race("upload", self.timeouts.upload, side_effect).await {
            // A cancelled side effect may have published `media.uploaded`.
            let announced = matches!(e, AppError::Timeout { .. });
            let err = abort(tx, e).await;
            self.abandon(ids, announced).await;
            return Err(err);
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(error = %e, "Upload commit failed after blob write");
            self.abandon(ids, true).await;
            return Err(e);
        }
        self.clear_pending(PendingOperationKind::Upload, &ids.as_array())
            .await;

        tracing::info!(
            media_id = record.media_id,
            owner_id,
            external_id = %record.external_id_full,
            duration_ms = started.elapsed().as_millis() as u64,
            "Media uploaded"
        );
        Ok(record)
    }

    /// Hard-delete a record and its blobs.
    ///
    /// Refused with `NotReady` while compression is running. The row is
    /// deleted and committed first; blobs are then removed inline, and any
    /// that could not be removed in time are handed to the orphan consumer.
    /// `caller_owner_id`, when given, must own the record.
    #[tracing::instrument(skip(self))]
    pub async fn delete_media(
        &self,
        media_id: i32,
        caller_owner_id: Option<i32>,
    ) -> Result<(), AppError> {
        let mut tx = self.metadata.begin(IsolationLevel::ReadCommitted).await?;

        let record = match tx.get_media_for_update(media_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let err = AppError::NotFound(format!("Media {} not found", media_id));
                return Err(abort(tx, err).await);
            }
            Err(e) => return Err(abort(tx, e).await),
        };

        if let Some(caller) = caller_owner_id {
            if caller != record.owner_id {
                let err = AppError::Unauthorized(format!(
                    "User {} does not own media {}",
                    caller, media_id
                ));
                return Err(abort(tx, err).await);
            }
        }

        if let Err(e) = CompressionStateMachine::ensure_deletable(media_id, record.compression_status)
        {
            return Err(abort(tx, e).await);
        }

        let ids = match tx.delete_media(media_id).await {
            Ok(ids) => ids.unwrap_or_else(|| record.external_ids()),
            Err(e) => return Err(abort(tx, e).await),
        };
        tx.commit().await?;

        let leftovers = self.remove_blobs(ids).await;
        if !leftovers.is_empty() {
            tracing::warn!(
                media_id,
                external_ids = ?leftovers,
                "Blob removal did not finish, handing off to orphan consumer"
            );
            self.reclaim(&leftovers).await;
        }

        tracing::info!(media_id, owner_id = record.owner_id, "Media deleted");
        Ok(())
    }

    /// Replace a user's profile image.
    ///
    /// A user without a profile image (or whose pointer names a record that
    /// is gone) gets a new record, and the pointer is set as the last effect
    /// before commit. Otherwise the existing record is rotated to fresh blob
    /// ids; the old ids are reclaimed only after the rotation committed. If
    /// the old compressed variant was still being produced, its id stays
    /// registered as superseded so a late compressor write is swept.
    #[tracing::instrument(skip(self, content), fields(media_id))]
    pub async fn replace_profile_image(
        &self,
        user_id: i32,
        content: MediaContent,
    ) -> Result<MediaRecord, AppError> {
        self.validator.validate(
            &content.data,
            &content.content_type,
            content.content_length,
        )?;

        let new_ids = ExternalIds::generate();
        self.metadata
            .register_pending(PendingOperationKind::Replace, &self.bucket, &new_ids.as_array())
            .await?;

        let mut tx = self.metadata.begin(IsolationLevel::Serializable).await?;

        let pointers = self.pointers.clone();
        let current_pointer = match race("profile pointer read", self.timeouts.read, async move {
            Ok::<_, AppError>(pointers.get_profile_media_id(user_id).await?)
        })
        .await
        {
            Ok(pointer) => pointer,
            Err(e) => {
                let err = abort(tx, e).await;
                self.clear_pending(PendingOperationKind::Replace, &new_ids.as_array())
                    .await;
                return Err(err);
            }
        };

        let existing = match current_pointer {
            Some(media_id) => match tx.get_media_for_update(media_id).await {
                Ok(record) => record,
                Err(e) => {
                    let err = abort(tx, e).await;
                    self.clear_pending(PendingOperationKind::Replace, &new_ids.as_array())
                        .await;
                    return Err(err);
                }
            },
            None => None,
        };

        if existing.is_none() && current_pointer.is_some() {
            tracing::warn!(
                user_id,
                media_id = ?current_pointer,
                "Profile pointer is dangling, creating new media"
            );
        }

        let (record, replaced) = match existing {
            Some(old) => {
                let record = match tx
                    .rotate_external_ids(old.media_id, new_ids, &content.content_type)
                    .await
                {
                    Ok(record) => record,
                    Err(e) => return Err(abort(tx, e).await),
                };
                tracing::Span::current().record("media_id", record.media_id);

                let side_effect = self.store_and_announce(&record, content, None);
                if let Err(e) = race("replace", self.timeouts.replace, side_effect).await {
                    let announced = matches!(e, AppError::Timeout { .. });
                    let err = abort(tx, e).await;
                    self.abandon(new_ids, announced).await;
                    return Err(err);
                }
                if let Err(e) = tx.commit().await {
                    self.abandon(new_ids, true).await;
                    return Err(e);
                }
                (record, Some(old))
            }
            None => {
                let record = match tx
                    .create_media(&NewMedia {
                        owner_id: user_id,
                        external_ids: new_ids,
                        content_type: content.content_type.clone(),
                    })
                    .await
                {
                    Ok(record) => record,
                    Err(e) => return Err(abort(tx, e).await),
                };
                tracing::Span::current().record("media_id", record.media_id);

                let side_effect =
                    self.store_and_announce(&record, content, Some((user_id, record.media_id)));
                if let Err(e) = race("replace", self.timeouts.replace, side_effect).await {
                    let timed_out = matches!(e, AppError::Timeout { .. });
                    let err = abort(tx, e).await;
                    if timed_out {
                        // The pointer RPC may have landed before cancellation.
                        self.restore_pointer(user_id, current_pointer).await;
                    }
                    self.abandon(new_ids, timed_out).await;
                    return Err(err);
                }
                if let Err(e) = tx.commit().await {
                    tracing::error!(error = %e, "Replace commit failed after pointer update");
                    self.restore_pointer(user_id, current_pointer).await;
                    self.abandon(new_ids, true).await;
                    return Err(e);
                }
                (record, None)
            }
        };

        self.clear_pending(PendingOperationKind::Replace, &new_ids.as_array())
            .await;
        if let Some(old) = &replaced {
            if old.compression_status == CompressionStatus::Started {
                self.register_superseded(old.external_id_compressed).await;
            }
            self.reclaim(&old.external_ids().as_array()).await;
        }

        tracing::info!(
            user_id,
            media_id = record.media_id,
            rotated = replaced.is_some(),
            "Profile image replaced"
        );
        Ok(record)
    }

    /// Side effect of a write: store the full blob, publish `media.uploaded`
    /// and, if `pointer` is given, point the user at the record.
    fn store_and_announce(
        &self,
        record: &MediaRecord,
        content: MediaContent,
        pointer: Option<(i32, i32)>,
    ) -> impl std::future::Future<Output = Result<(), AppError>> + Send + 'static {
        let blobs = self.blobs.clone();
        let events = self.events.clone();
        let pointers = self.pointers.clone();
        let bucket = self.bucket.clone();
        let event = MediaUploaded {
            media_id: record.media_id,
            external_id_full: record.external_id_full,
            external_id_compressed: record.external_id_compressed,
            content_type: content.content_type.clone(),
        };

        async move {
            blobs
                .put(
                    &bucket,
                    &blob_key(event.external_id_full),
                    content.data,
                    &content.content_type,
                )
                .await?;
            publish_event(events.as_ref(), &event).await?;
            if let Some((user_id, media_id)) = pointer {
                pointers
                    .set_profile_media_id(user_id, Some(media_id))
                    .await?;
            }
            Ok::<(), AppError>(())
        }
    }

    /// Remove both blobs of a deleted record concurrently within the delete
    /// budget. Returns the ids that may still exist.
    async fn remove_blobs(&self, ids: ExternalIds) -> Vec<Uuid> {
        let blobs = self.blobs.clone();
        let bucket = self.bucket.clone();
        let removal = async move {
            let full_key = blob_key(ids.full);
            let compressed_key = blob_key(ids.compressed);
            let (full, compressed) = tokio::join!(
                blobs.remove(&bucket, &full_key),
                blobs.remove(&bucket, &compressed_key),
            );

            let mut failed = Vec::new();
            for (id, result) in [(ids.full, full), (ids.compressed, compressed)] {
                if let Err(e) = result {
                    tracing::warn!(external_id = %id, error = %e, "Blob removal failed");
                    failed.push(id);
                }
            }
            Ok::<_, AppError>(failed)
        };

        match race("delete", self.timeouts.delete, removal).await {
            Ok(failed) => failed,
            Err(_) => ids.as_array().to_vec(),
        }
    }

    /// Put the user's pointer back, within the compensation budget.
    async fn restore_pointer(&self, user_id: i32, previous: Option<i32>) {
        let pointers = self.pointers.clone();
        let restore = async move {
            Ok::<_, AppError>(pointers.set_profile_media_id(user_id, previous).await?)
        };
        match race("profile pointer restore", self.timeouts.compensation, restore).await {
            Ok(()) => tracing::info!(user_id, media_id = ?previous, "Profile pointer restored"),
            Err(e) => tracing::error!(
                user_id,
                media_id = ?previous,
                error = %e,
                "Failed to restore profile pointer, readers will see a dangling pointer"
            ),
        }
    }
}

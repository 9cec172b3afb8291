use bytes::Bytes;
use socialstream_core::models::MediaRecord;
use socialstream_core::AppError;
use socialstream_db::MetadataStore;
use socialstream_storage::keys::blob_key;
use socialstream_storage::BlobStore;
use std::sync::Arc;
use uuid::Uuid;

use super::MediaLifecycleCoordinator;
use crate::compression::CompressionStateMachine;
use crate::race::race;

/// Bytes selected for serving, with the record they belong to.
#[derive(Debug, Clone)]
pub struct ServedMedia {
    pub media_id: i32,
    pub external_id: Uuid,
    /// True when the compressed variant was served.
    pub compressed: bool,
    pub content_type: String,
    pub data: Bytes,
}

impl MediaLifecycleCoordinator {
    /// The user's profile image, resolved through the profile pointer.
    ///
    /// No pointer and a pointer to a record that no longer exists are both
    /// `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_profile_image(&self, user_id: i32) -> Result<ServedMedia, AppError> {
        let pointers = self.pointers.clone();
        let metadata = self.metadata.clone();
        let blobs = self.blobs.clone();
        let bucket = self.bucket.clone();

        race("profile image read", self.timeouts.read, async move {
            let media_id = pointers.get_profile_media_id(user_id).await?.ok_or_else(|| {
                AppError::NotFound(format!("User {} has no profile image", user_id))
            })?;
            let record = metadata.get_media(media_id).await?.ok_or_else(|| {
                tracing::warn!(user_id, media_id, "Profile pointer is dangling");
                AppError::NotFound(format!("User {} has no profile image", user_id))
            })?;
            fetch_servable(blobs.as_ref(), &bucket, record).await
        })
        .await
    }

    /// Bytes of a media item: compressed once available, full before.
    #[tracing::instrument(skip(self))]
    pub async fn get_media(&self, media_id: i32) -> Result<ServedMedia, AppError> {
        let metadata = self.metadata.clone();
        let blobs = self.blobs.clone();
        let bucket = self.bucket.clone();

        race("media read", self.timeouts.read, async move {
            let record = find_record(metadata.as_ref(), media_id).await?;
            fetch_servable(blobs.as_ref(), &bucket, record).await
        })
        .await
    }

    pub async fn get_media_record(&self, media_id: i32) -> Result<MediaRecord, AppError> {
        find_record(self.metadata.as_ref(), media_id).await
    }

    pub async fn list_media(&self) -> Result<Vec<MediaRecord>, AppError> {
        self.metadata.list_media().await
    }
}

async fn find_record(metadata: &dyn MetadataStore, media_id: i32) -> Result<MediaRecord, AppError> {
    metadata
        .get_media(media_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Media {} not found", media_id)))
}

async fn fetch_servable(
    blobs: &dyn BlobStore,
    bucket: &str,
    record: MediaRecord,
) -> Result<ServedMedia, AppError> {
    let external_id = CompressionStateMachine::servable_id(&record);
    let object = blobs.get(bucket, &blob_key(external_id)).await?;

    Ok(ServedMedia {
        media_id: record.media_id,
        external_id,
        compressed: external_id == record.external_id_compressed,
        content_type: object.content_type.unwrap_or(record.content_type),
        data: object.data,
    })
}

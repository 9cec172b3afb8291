use async_trait::async_trait;
use socialstream_core::models::{
    CompressionStatus, ExternalIds, MediaRecord, NewMedia, PendingBlobOperation,
    PendingOperationKind,
};
use socialstream_core::AppError;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use super::pending::PendingOperationRepository;
use super::store::{CompressionUpdate, IsolationLevel, MetadataStore, MetadataTx};
use super::transaction::TransactionGuard;

const MEDIA_COLUMNS: &str = "media_id, owner_id, external_id_full, external_id_compressed, \
     content_type, compression_status, is_active, upload_date";

/// Map a unique violation on the external id columns to `Conflict`.
fn map_write_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(format!("External id already in use: {}", db_err));
        }
    }
    AppError::Database(err)
}

/// Postgres media repository
///
/// Owns the `media` table and, through [`PendingOperationRepository`], the
/// pending blob operation registry.
#[derive(Clone)]
pub struct MediaRepository {
    pool: PgPool,
    pending: PendingOperationRepository,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pending: PendingOperationRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for MediaRepository {
    #[tracing::instrument(skip(self))]
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn MetadataTx>, AppError> {
        let guard = TransactionGuard::begin(&self.pool, isolation).await?;
        Ok(Box::new(PgMetadataTx { guard }))
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select", db.record_id = media_id))]
    async fn get_media(&self, media_id: i32) -> Result<Option<MediaRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, MediaRecord>(&format!(
            "SELECT {} FROM media WHERE media_id = $1",
            MEDIA_COLUMNS
        ))
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select"))]
    async fn list_media(&self) -> Result<Vec<MediaRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, MediaRecord>(&format!(
            "SELECT {} FROM media ORDER BY media_id",
            MEDIA_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select", db.record_id = media_id))]
    async fn get_external_ids(&self, media_id: i32) -> Result<Option<ExternalIds>, AppError> {
        let row: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT external_id_full, external_id_compressed
            FROM media
            WHERE media_id = $1
            "#,
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(full, compressed)| ExternalIds { full, compressed }))
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select", db.record_id = media_id))]
    async fn get_compression_status(
        &self,
        media_id: i32,
    ) -> Result<Option<CompressionStatus>, AppError> {
        let status: Option<CompressionStatus> =
            sqlx::query_scalar("SELECT compression_status FROM media WHERE media_id = $1")
                .bind(media_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "update", db.record_id = media_id))]
    async fn mark_compression_complete(
        &self,
        media_id: i32,
        expected_compressed: Option<Uuid>,
    ) -> Result<CompressionUpdate, AppError> {
        // Single conditional UPDATE: a record never leaves 'complete' and a
        // rotated record is never completed by an event for its old blob.
        let updated: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE media
            SET compression_status = 'complete'
            WHERE media_id = $1
                AND compression_status = 'started'
                AND ($2::uuid IS NULL OR external_id_compressed = $2)
            RETURNING media_id
            "#,
        )
        .bind(media_id)
        .bind(expected_compressed)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(CompressionUpdate::Applied);
        }

        let current: Option<(CompressionStatus, Uuid)> = sqlx::query_as(
            "SELECT compression_status, external_id_compressed FROM media WHERE media_id = $1",
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match current {
            None => CompressionUpdate::Missing,
            Some((_, compressed)) if expected_compressed.is_some_and(|id| id != compressed) => {
                CompressionUpdate::Stale
            }
            Some(_) => CompressionUpdate::AlreadyComplete,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select"))]
    async fn is_external_id_referenced(&self, external_id: Uuid) -> Result<bool, AppError> {
        let referenced: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM media
                WHERE external_id_full = $1 OR external_id_compressed = $1
            )
            "#,
        )
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(referenced)
    }

    async fn register_pending(
        &self,
        kind: PendingOperationKind,
        bucket: &str,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        self.pending.register(kind, bucket, external_ids).await
    }

    async fn clear_pending(
        &self,
        kind: PendingOperationKind,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        self.pending.clear(kind, external_ids).await
    }

    async fn pending_kinds(
        &self,
        external_id: Uuid,
    ) -> Result<Vec<PendingOperationKind>, AppError> {
        self.pending.kinds_for(external_id).await
    }

    async fn list_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PendingBlobOperation>, AppError> {
        self.pending.list_stale(older_than, limit).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Transaction over the `media` table.
pub struct PgMetadataTx {
    guard: TransactionGuard,
}

#[async_trait]
impl MetadataTx for PgMetadataTx {
    #[tracing::instrument(skip(self, new), fields(db.table = "media", db.operation = "insert", owner_id = new.owner_id))]
    async fn create_media(&mut self, new: &NewMedia) -> Result<MediaRecord, AppError> {
        let record = sqlx::query_as::<Postgres, MediaRecord>(&format!(
            r#"
            INSERT INTO media (owner_id, external_id_full, external_id_compressed, content_type)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            MEDIA_COLUMNS
        ))
        .bind(new.owner_id)
        .bind(new.external_ids.full)
        .bind(new.external_ids.compressed)
        .bind(&new.content_type)
        .fetch_one(self.guard.conn()?)
        .await
        .map_err(map_write_error)?;

        tracing::debug!(media_id = record.media_id, "Media row inserted");
        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "select_for_update", db.record_id = media_id))]
    async fn get_media_for_update(
        &mut self,
        media_id: i32,
    ) -> Result<Option<MediaRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, MediaRecord>(&format!(
            "SELECT {} FROM media WHERE media_id = $1 FOR UPDATE",
            MEDIA_COLUMNS
        ))
        .bind(media_id)
        .fetch_optional(self.guard.conn()?)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, external_ids), fields(db.table = "media", db.operation = "update", db.record_id = media_id))]
    async fn rotate_external_ids(
        &mut self,
        media_id: i32,
        external_ids: ExternalIds,
        content_type: &str,
    ) -> Result<MediaRecord, AppError> {
        let record = sqlx::query_as::<Postgres, MediaRecord>(&format!(
            r#"
            UPDATE media
            SET external_id_full = $2,
                external_id_compressed = $3,
                content_type = $4,
                compression_status = 'started'
            WHERE media_id = $1
            RETURNING {}
            "#,
            MEDIA_COLUMNS
        ))
        .bind(media_id)
        .bind(external_ids.full)
        .bind(external_ids.compressed)
        .bind(content_type)
        .fetch_optional(self.guard.conn()?)
        .await
        .map_err(map_write_error)?;

        record.ok_or_else(|| AppError::NotFound(format!("Media {} not found", media_id)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "media", db.operation = "delete", db.record_id = media_id))]
    async fn delete_media(&mut self, media_id: i32) -> Result<Option<ExternalIds>, AppError> {
        let row: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            DELETE FROM media
            WHERE media_id = $1
            RETURNING external_id_full, external_id_compressed
            "#,
        )
        .bind(media_id)
        .fetch_optional(self.guard.conn()?)
        .await?;

        Ok(row.map(|(full, compressed)| ExternalIds { full, compressed }))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.guard.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.guard.rollback().await
    }
}

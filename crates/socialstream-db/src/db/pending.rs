use socialstream_core::models::{PendingBlobOperation, PendingOperationKind};
use socialstream_core::AppError;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

/// Registry of blob ids whose outcome is not settled yet.
///
/// Every write goes straight to the pool, never through a media transaction,
/// so the rows outlive a rollback.
#[derive(Clone)]
pub struct PendingOperationRepository {
    pool: PgPool,
}

impl PendingOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "pending_blob_operations", db.operation = "insert"))]
    pub async fn register(
        &self,
        kind: PendingOperationKind,
        bucket: &str,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        if external_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO pending_blob_operations (kind, bucket, external_id)
            SELECT $1, $2, id FROM UNNEST($3::uuid[]) AS t(id)
            ON CONFLICT (kind, external_id) DO NOTHING
            "#,
        )
        .bind(kind.to_string())
        .bind(bucket)
        .bind(external_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "pending_blob_operations", db.operation = "delete"))]
    pub async fn clear(
        &self,
        kind: PendingOperationKind,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        if external_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            DELETE FROM pending_blob_operations
            WHERE kind = $1 AND external_id = ANY($2)
            "#,
        )
        .bind(kind.to_string())
        .bind(external_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "pending_blob_operations", db.operation = "select"))]
    pub async fn kinds_for(&self, external_id: Uuid) -> Result<Vec<PendingOperationKind>, AppError> {
        let kinds: Vec<PendingOperationKind> = sqlx::query_scalar(
            "SELECT kind FROM pending_blob_operations WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(kinds)
    }

    #[tracing::instrument(skip(self), fields(db.table = "pending_blob_operations", db.operation = "select"))]
    pub async fn list_stale(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PendingBlobOperation>, AppError> {
        let operations = sqlx::query_as::<Postgres, PendingBlobOperation>(
            r#"
            SELECT kind, bucket, external_id, created_at
            FROM pending_blob_operations
            WHERE created_at <= NOW() - make_interval(secs => $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(operations)
    }
}

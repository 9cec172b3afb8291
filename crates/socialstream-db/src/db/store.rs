//! Metadata store traits
//!
//! The coordinator works against these traits so it can run over Postgres in
//! production and over the in-memory store in tests.

use async_trait::async_trait;
use socialstream_core::models::{
    CompressionStatus, ExternalIds, MediaRecord, NewMedia, PendingBlobOperation,
    PendingOperationKind,
};
use socialstream_core::AppError;
use std::time::Duration;
use uuid::Uuid;

/// Isolation level requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

/// Outcome of a `started -> complete` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionUpdate {
    /// The record moved to `complete`.
    Applied,
    /// The record was already `complete`; nothing changed.
    AlreadyComplete,
    /// The event named a compressed id the record no longer has.
    Stale,
    /// No record with that id.
    Missing,
}

/// Non-transactional access to media records and the pending registry.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Open a transaction for a multi-step lifecycle operation.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn MetadataTx>, AppError>;

    async fn get_media(&self, media_id: i32) -> Result<Option<MediaRecord>, AppError>;

    /// All records ordered by `media_id`.
    async fn list_media(&self) -> Result<Vec<MediaRecord>, AppError>;

    async fn get_external_ids(&self, media_id: i32) -> Result<Option<ExternalIds>, AppError>;

    async fn get_compression_status(
        &self,
        media_id: i32,
    ) -> Result<Option<CompressionStatus>, AppError>;

    /// Monotonic `started -> complete`. When `expected_compressed` is given the
    /// update only applies if the record still carries that compressed id.
    /// Waits for a transaction holding the record to finish.
    async fn mark_compression_complete(
        &self,
        media_id: i32,
        expected_compressed: Option<Uuid>,
    ) -> Result<CompressionUpdate, AppError>;

    /// Whether any record points at `external_id` through either column.
    async fn is_external_id_referenced(&self, external_id: Uuid) -> Result<bool, AppError>;

    /// Record blob ids whose outcome is not settled. Idempotent per (kind, id).
    async fn register_pending(
        &self,
        kind: PendingOperationKind,
        bucket: &str,
        external_ids: &[Uuid],
    ) -> Result<(), AppError>;

    async fn clear_pending(
        &self,
        kind: PendingOperationKind,
        external_ids: &[Uuid],
    ) -> Result<(), AppError>;

    /// Kinds under which `external_id` is currently registered.
    async fn pending_kinds(
        &self,
        external_id: Uuid,
    ) -> Result<Vec<PendingOperationKind>, AppError>;

    /// Pending operations older than `older_than`, oldest first.
    async fn list_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PendingBlobOperation>, AppError>;

    /// Cheap connectivity check for readiness.
    async fn ping(&self) -> Result<(), AppError>;
}

/// An open metadata transaction.
///
/// Nothing written through it is visible to other readers before `commit`.
/// Dropping it without `commit` discards the changes.
#[async_trait]
pub trait MetadataTx: Send {
    /// Insert a record with status `started` and `is_active = true`.
    async fn create_media(&mut self, new: &NewMedia) -> Result<MediaRecord, AppError>;

    /// Read a record and lock it until the transaction ends.
    async fn get_media_for_update(&mut self, media_id: i32)
        -> Result<Option<MediaRecord>, AppError>;

    /// Point the record at fresh blob ids and reset it to `started`.
    async fn rotate_external_ids(
        &mut self,
        media_id: i32,
        external_ids: ExternalIds,
        content_type: &str,
    ) -> Result<MediaRecord, AppError>;

    /// Delete a record, returning the ids it referenced.
    async fn delete_media(&mut self, media_id: i32) -> Result<Option<ExternalIds>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

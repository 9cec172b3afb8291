//! In-process metadata store.
//!
//! Transactions stage their writes in a private journal and apply them on
//! commit, so uncommitted rows are invisible to other readers. Writers are
//! serialized through a single async lock, which is at least as strict as the
//! row locks Postgres takes. Ids come from a counter that is never rolled
//! back, matching a SERIAL column.

use async_trait::async_trait;
use chrono::Utc;
use socialstream_core::models::{
    CompressionStatus, ExternalIds, MediaRecord, NewMedia, PendingBlobOperation,
    PendingOperationKind,
};
use socialstream_core::AppError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::{CompressionUpdate, IsolationLevel, MetadataStore, MetadataTx};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<i32, MediaRecord>,
    pending: Vec<PendingBlobOperation>,
}

struct Shared {
    state: Mutex<MemoryState>,
    writer: Arc<AsyncMutex<()>>,
    next_id: AtomicI32,
    fail_next_commit: AtomicBool,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory metadata store poisoned".to_string()))
    }
}

/// In-memory [`MetadataStore`].
#[derive(Clone)]
pub struct MemoryMetadataStore {
    shared: Arc<Shared>,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                writer: Arc::new(AsyncMutex::new(())),
                next_id: AtomicI32::new(1),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next `commit` fail after the transaction did all its work.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a committed record directly, bypassing the coordinator.
    pub fn insert_record(&self, record: MediaRecord) -> Result<(), AppError> {
        let mut state = self.shared.state()?;
        self.shared
            .next_id
            .fetch_max(record.media_id + 1, Ordering::SeqCst);
        state.records.insert(record.media_id, record);
        Ok(())
    }

    /// Snapshot of the pending registry.
    pub fn pending_operations(&self) -> Vec<PendingBlobOperation> {
        self.shared
            .state()
            .map(|state| state.pending.clone())
            .unwrap_or_default()
    }

    /// Backdate every pending row so a sweep with a grace period sees it.
    pub fn age_pending(&self, by: Duration) {
        if let Ok(mut state) = self.shared.state() {
            let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
            for op in state.pending.iter_mut() {
                op.created_at -= by;
            }
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&self, _isolation: IsolationLevel) -> Result<Box<dyn MetadataTx>, AppError> {
        let writer = self.shared.writer.clone().lock_owned().await;
        Ok(Box::new(MemoryMetadataTx {
            shared: self.shared.clone(),
            staged: BTreeMap::new(),
            _writer: writer,
        }))
    }

    async fn get_media(&self, media_id: i32) -> Result<Option<MediaRecord>, AppError> {
        Ok(self.shared.state()?.records.get(&media_id).cloned())
    }

    async fn list_media(&self) -> Result<Vec<MediaRecord>, AppError> {
        Ok(self.shared.state()?.records.values().cloned().collect())
    }

    async fn get_external_ids(&self, media_id: i32) -> Result<Option<ExternalIds>, AppError> {
        Ok(self
            .shared
            .state()?
            .records
            .get(&media_id)
            .map(MediaRecord::external_ids))
    }

    async fn get_compression_status(
        &self,
        media_id: i32,
    ) -> Result<Option<CompressionStatus>, AppError> {
        Ok(self
            .shared
            .state()?
            .records
            .get(&media_id)
            .map(|r| r.compression_status))
    }

    async fn mark_compression_complete(
        &self,
        media_id: i32,
        expected_compressed: Option<Uuid>,
    ) -> Result<CompressionUpdate, AppError> {
        // Same wait a Postgres UPDATE has on a row another transaction locked.
        let _writer = self.shared.writer.lock().await;
        let mut state = self.shared.state()?;
        let Some(record) = state.records.get_mut(&media_id) else {
            return Ok(CompressionUpdate::Missing);
        };

        if expected_compressed.is_some_and(|id| id != record.external_id_compressed) {
            return Ok(CompressionUpdate::Stale);
        }

        Ok(match record.compression_status {
            CompressionStatus::Complete => CompressionUpdate::AlreadyComplete,
            CompressionStatus::Started => {
                record.compression_status = CompressionStatus::Complete;
                CompressionUpdate::Applied
            }
        })
    }

    async fn is_external_id_referenced(&self, external_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .shared
            .state()?
            .records
            .values()
            .any(|r| r.references(external_id)))
    }

    async fn register_pending(
        &self,
        kind: PendingOperationKind,
        bucket: &str,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let mut state = self.shared.state()?;
        for id in external_ids {
            let exists = state
                .pending
                .iter()
                .any(|op| op.kind == kind && op.external_id == *id);
            if !exists {
                state.pending.push(PendingBlobOperation {
                    kind,
                    bucket: bucket.to_string(),
                    external_id: *id,
                    created_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn clear_pending(
        &self,
        kind: PendingOperationKind,
        external_ids: &[Uuid],
    ) -> Result<(), AppError> {
        self.shared
            .state()?
            .pending
            .retain(|op| !(op.kind == kind && external_ids.contains(&op.external_id)));
        Ok(())
    }

    async fn pending_kinds(
        &self,
        external_id: Uuid,
    ) -> Result<Vec<PendingOperationKind>, AppError> {
        Ok(self
            .shared
            .state()?
            .pending
            .iter()
            .filter(|op| op.external_id == external_id)
            .map(|op| op.kind)
            .collect())
    }

    async fn list_stale_pending(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<Vec<PendingBlobOperation>, AppError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        let mut stale: Vec<PendingBlobOperation> = self
            .shared
            .state()?
            .pending
            .iter()
            .filter(|op| op.created_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|op| op.created_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.shared.state().map(|_| ())
    }
}

/// Staged transaction over [`MemoryMetadataStore`]. `None` marks a deletion.
pub struct MemoryMetadataTx {
    shared: Arc<Shared>,
    staged: BTreeMap<i32, Option<MediaRecord>>,
    _writer: OwnedMutexGuard<()>,
}

impl MemoryMetadataTx {
    fn current(&self, media_id: i32) -> Result<Option<MediaRecord>, AppError> {
        match self.staged.get(&media_id) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.shared.state()?.records.get(&media_id).cloned()),
        }
    }

    fn ensure_unused(&self, ids: &ExternalIds, except: Option<i32>) -> Result<(), AppError> {
        let state = self.shared.state()?;
        let committed = state
            .records
            .values()
            .filter(|r| !self.staged.contains_key(&r.media_id));
        let staged = self.staged.values().flatten();
        let clash = committed
            .chain(staged)
            .filter(|r| Some(r.media_id) != except)
            .any(|r| r.references(ids.full) || r.references(ids.compressed));
        if clash {
            return Err(AppError::Conflict("External id already in use".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataTx for MemoryMetadataTx {
    async fn create_media(&mut self, new: &NewMedia) -> Result<MediaRecord, AppError> {
        self.ensure_unused(&new.external_ids, None)?;
        let media_id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let record = MediaRecord {
            media_id,
            owner_id: new.owner_id,
            external_id_full: new.external_ids.full,
            external_id_compressed: new.external_ids.compressed,
            content_type: new.content_type.clone(),
            compression_status: CompressionStatus::Started,
            is_active: true,
            upload_date: Utc::now(),
        };
        self.staged.insert(media_id, Some(record.clone()));
        Ok(record)
    }

    async fn get_media_for_update(
        &mut self,
        media_id: i32,
    ) -> Result<Option<MediaRecord>, AppError> {
        self.current(media_id)
    }

    async fn rotate_external_ids(
        &mut self,
        media_id: i32,
        external_ids: ExternalIds,
        content_type: &str,
    ) -> Result<MediaRecord, AppError> {
        let mut record = self
            .current(media_id)?
            .ok_or_else(|| AppError::NotFound(format!("Media {} not found", media_id)))?;
        self.ensure_unused(&external_ids, Some(media_id))?;
        record.external_id_full = external_ids.full;
        record.external_id_compressed = external_ids.compressed;
        record.content_type = content_type.to_string();
        record.compression_status = CompressionStatus::Started;
        self.staged.insert(media_id, Some(record.clone()));
        Ok(record)
    }

    async fn delete_media(&mut self, media_id: i32) -> Result<Option<ExternalIds>, AppError> {
        let ids = self.current(media_id)?.map(|r| r.external_ids());
        if ids.is_some() {
            self.staged.insert(media_id, None);
        }
        Ok(ids)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::Protocol(
                "injected commit failure".to_string(),
            )));
        }

        let mut state = self.shared.state()?;
        for (media_id, staged) in &self.staged {
            match staged {
                Some(record) => {
                    state.records.insert(*media_id, record.clone());
                }
                None => {
                    state.records.remove(media_id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

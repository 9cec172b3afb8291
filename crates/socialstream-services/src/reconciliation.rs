use chrono::Utc;
use socialstream_core::models::{PendingBlobOperation, PendingOperationKind};
use socialstream_core::AppError;
use socialstream_db::MetadataStore;
use socialstream_storage::keys::blob_key;
use socialstream_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Rows examined per sweep.
const SWEEP_BATCH_SIZE: i64 = 500;

/// Totals of one reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
    /// Superseded ids removed but left registered until the compressor
    /// deadline passes.
    pub retained: usize,
}

/// Periodic sweep over pending blob operations that never settled.
///
/// A blob referenced by a live record is kept; anything else is removed.
/// Either way the registry row is cleared once the outcome is known, except
/// for superseded compressed ids: a compressor may write those after the
/// removal, so they are removed on every sweep until the compression
/// deadline has passed.
#[derive(Clone)]
pub struct ReconciliationService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    sweep_interval: Duration,
    grace: Duration,
    compression_deadline: Duration,
}

impl ReconciliationService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        sweep_interval: Duration,
        grace: Duration,
        compression_deadline: Duration,
    ) -> Self {
        Self {
            metadata,
            blobs,
            sweep_interval,
            grace,
            compression_deadline,
        }
    }

    /// Whether a compressor could still write the blob behind `op`.
    fn awaiting_compressor(&self, op: &PendingBlobOperation) -> bool {
        if op.kind != PendingOperationKind::Superseded {
            return false;
        }
        let age = (Utc::now() - op.created_at).to_std().unwrap_or(Duration::ZERO);
        age < self.compression_deadline
    }

    /// Start the background sweep.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.sweep_interval);
            sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                sweep_interval.tick().await;

                match self.sweep().await {
                    Ok(report) if report.examined == 0 => {
                        tracing::debug!("Reconciliation found nothing pending")
                    }
                    Ok(report) => tracing::info!(
                        examined = report.examined,
                        removed = report.removed,
                        kept = report.kept,
                        failed = report.failed,
                        retained = report.retained,
                        "Reconciliation sweep completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Reconciliation sweep failed"),
                }
            }
        })
    }

    #[tracing::instrument(skip(self), fields(reconcile.grace_secs = self.grace.as_secs()))]
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let stale = self
            .metadata
            .list_stale_pending(self.grace, SWEEP_BATCH_SIZE)
            .await?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for op in stale {
            let referenced = match self.metadata.is_external_id_referenced(op.external_id).await {
                Ok(referenced) => referenced,
                Err(e) => {
                    tracing::error!(external_id = %op.external_id, error = %e, "Reference check failed");
                    report.failed += 1;
                    continue;
                }
            };

            if referenced {
                report.kept += 1;
            } else {
                match self
                    .blobs
                    .remove(&op.bucket, &blob_key(op.external_id))
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            kind = %op.kind,
                            external_id = %op.external_id,
                            "Removed unreferenced blob"
                        );
                        report.removed += 1;
                        if self.awaiting_compressor(&op) {
                            report.retained += 1;
                            continue;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            kind = %op.kind,
                            external_id = %op.external_id,
                            error = %e,
                            "Failed to remove unreferenced blob, will retry next sweep"
                        );
                        report.failed += 1;
                        continue;
                    }
                }
            }

            if let Err(e) = self
                .metadata
                .clear_pending(op.kind, &[op.external_id])
                .await
            {
                tracing::warn!(external_id = %op.external_id, error = %e, "Failed to clear pending operation");
            }
        }

        Ok(report)
    }
}

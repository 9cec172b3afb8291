//! Reconciliation sweep over the pending blob operation registry.
//!
//! Run with: `cargo test -p socialstream-services --test reconciliation_test`

mod helpers;

use helpers::{harness, jpeg, BUCKET};
use socialstream_core::models::PendingOperationKind;
use socialstream_db::MetadataStore;
use socialstream_services::ReconciliationService;
use std::sync::Arc;
use std::time::Duration;

fn service(h: &helpers::Harness) -> ReconciliationService {
    ReconciliationService::new(
        Arc::new(h.metadata.clone()),
        h.blobs.clone(),
        Duration::from_secs(300),
        Duration::from_secs(60),
        Duration::from_secs(3600),
    )
}

#[tokio::test]
async fn test_sweep_removes_unreferenced_blob() {
    let h = harness().await;
    // Blob written, publish failed: the row is rolled back and nothing
    // references the blob.
    h.bus.set_publish_failure(true);
    h.coordinator.upload(1, jpeg(64)).await.unwrap_err();
    assert_eq!(h.blobs.inner.len(), 1);

    h.metadata.age_pending(Duration::from_secs(120));
    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.removed, 2);
    assert!(h.blobs.inner.is_empty());
    assert!(h.metadata.pending_operations().is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_referenced_blob() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(64)).await.unwrap();
    h.metadata
        .register_pending(
            PendingOperationKind::Upload,
            BUCKET,
            &[record.external_id_full],
        )
        .await
        .unwrap();

    h.metadata.age_pending(Duration::from_secs(120));
    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.kept, 1);
    assert_eq!(report.removed, 0);
    assert!(h.blobs.contains(record.external_id_full));
    assert!(h.metadata.pending_operations().is_empty());
}

#[tokio::test]
async fn test_sweep_leaves_young_operations_alone() {
    let h = harness().await;
    h.bus.set_publish_failure(true);
    h.coordinator.upload(1, jpeg(64)).await.unwrap_err();

    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(h.blobs.inner.len(), 1);
    assert_eq!(h.metadata.pending_operations().len(), 2);
}

#[tokio::test]
async fn test_failed_removal_stays_registered() {
    let h = harness().await;
    h.bus.set_publish_failure(true);
    h.coordinator.upload(1, jpeg(64)).await.unwrap_err();
    h.blobs.set_remove_failure(true);

    h.metadata.age_pending(Duration::from_secs(120));
    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(h.metadata.pending_operations().len(), 2);
}

#[tokio::test]
async fn test_superseded_variant_is_swept_until_compression_deadline() {
    let h = harness().await;
    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(64))
        .await
        .unwrap();
    h.coordinator
        .replace_profile_image(7, jpeg(96))
        .await
        .unwrap();
    for id in first.external_ids().as_array() {
        h.coordinator.on_orphan_blob_deleted(id).await.unwrap();
    }

    // The old compressor writes its variant after the orphan consumer ran.
    h.write_compressed_blob(&first).await;
    h.metadata.age_pending(Duration::from_secs(120));
    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.retained, 1);
    assert!(!h.blobs.contains(first.external_id_compressed));
    assert_eq!(h.metadata.pending_operations().len(), 1);

    // Past the deadline the id is settled.
    h.metadata.age_pending(Duration::from_secs(3600));
    let report = service(&h).sweep().await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.retained, 0);
    assert!(h.metadata.pending_operations().is_empty());
}

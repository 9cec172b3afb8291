//! Coordinator lifecycle tests over in-memory collaborators.
//!
//! Run with: `cargo test -p socialstream-services --test lifecycle_test`

mod helpers;

use helpers::{harness, harness_with, jpeg, BUCKET};
use socialstream_core::models::{CompressionStatus, MediaCompressed, PendingOperationKind};
use socialstream_core::{AppError, ErrorMetadata, LifecycleTimeouts};
use socialstream_db::{CompressionUpdate, MetadataStore};
use socialstream_services::{MediaContent, ProfilePointerClient};
use socialstream_storage::BlobStore;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[tokio::test]
async fn test_upload_compress_delete_scenario() {
    let h = harness().await;

    let mut empty = jpeg(0);
    empty.content_length = 0;
    let err = h.coordinator.upload(1, empty).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let record = h.coordinator.upload(1, jpeg(1024)).await.unwrap();
    assert_eq!(record.media_id, 1);
    assert_eq!(record.compression_status, CompressionStatus::Started);
    assert!(record.is_active);
    assert!(h.blobs.contains(record.external_id_full));

    let uploaded = h.bus.published_json("media.uploaded");
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0]["mediaId"], 1);
    assert_eq!(
        uploaded[0]["externalIdFull"],
        record.external_id_full.to_string()
    );
    assert!(h.metadata.pending_operations().is_empty());

    h.write_compressed_blob(&record).await;
    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: 1,
            external_id_compressed: None,
        })
        .await
        .unwrap();
    assert_eq!(update, CompressionUpdate::Applied);
    assert_eq!(h.status(1).await, Some(CompressionStatus::Complete));

    h.coordinator.delete_media(1, Some(1)).await.unwrap();
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert!(!h.blobs.contains(record.external_id_full));
    assert!(!h.blobs.contains(record.external_id_compressed));
}

#[tokio::test]
async fn test_upload_rejects_declared_length_mismatch() {
    let h = harness().await;
    let mut content = jpeg(100);
    content.content_length = 50;

    let err = h.coordinator.upload(1, content).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn test_upload_rejects_unlisted_content_type() {
    let h = harness().await;
    let content = MediaContent::new(bytes::Bytes::from_static(b"GIF89a"), "image/gif");

    let err = h.coordinator.upload(1, content).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_failed_blob_write_leaves_no_row() {
    let h = harness().await;
    h.blobs.set_put_failure(true);

    let err = h.coordinator.upload(1, jpeg(512)).await.unwrap_err();
    assert!(matches!(err, AppError::Upstream { .. }));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert!(h.bus.published_json("media.uploaded").is_empty());

    // Both ids are announced for cleanup and stay registered as a backstop.
    assert_eq!(h.deleted_external_ids().len(), 2);
    let pending = h.metadata.pending_operations();
    assert_eq!(pending.len(), 2);
    assert!(pending
        .iter()
        .all(|op| op.kind == PendingOperationKind::Upload));
}

#[tokio::test]
async fn test_timed_out_upload_is_cancelled_and_rolled_back() {
    let timeouts = LifecycleTimeouts {
        upload: Duration::from_millis(50),
        ..LifecycleTimeouts::default()
    };
    let h = harness_with(timeouts).await;
    h.blobs.set_put_delay(Duration::from_millis(300));

    let err = h.coordinator.upload(1, jpeg(512)).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Timeout {
            operation: "upload",
            ..
        }
    ));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());

    // The write was cancelled rather than left running in the background.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn test_failed_publish_rolls_back_upload() {
    let h = harness().await;
    h.bus.set_publish_failure(true);

    let err = h.coordinator.upload(1, jpeg(512)).await.unwrap_err();
    assert!(matches!(err, AppError::Upstream { .. }));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    // The blob was written but nothing references it; the registry keeps it.
    assert_eq!(h.blobs.inner.len(), 1);
    assert_eq!(h.metadata.pending_operations().len(), 2);
}

#[tokio::test]
async fn test_commit_failure_after_side_effects_cleans_up() {
    let h = harness().await;
    h.metadata.fail_next_commit();

    let err = h.coordinator.upload(1, jpeg(512)).await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert_eq!(h.deleted_external_ids().len(), 2);
}

#[tokio::test]
async fn test_delete_refused_while_compressing() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();

    let err = h
        .coordinator
        .delete_media(record.media_id, Some(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotReady(_)));
    assert!(h.record(record.media_id).await.is_some());
    assert!(h.blobs.contains(record.external_id_full));
}

#[tokio::test]
async fn test_delete_by_other_user_is_unauthorized() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();

    let err = h
        .coordinator
        .delete_media(record.media_id, Some(2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    assert!(h.record(record.media_id).await.is_some());
}

#[tokio::test]
async fn test_delete_unknown_media_is_not_found() {
    let h = harness().await;
    let err = h.coordinator.delete_media(42, None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_removes_row_and_blobs() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.write_compressed_blob(&record).await;
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();

    h.coordinator
        .delete_media(record.media_id, None)
        .await
        .unwrap();

    assert!(h.record(record.media_id).await.is_none());
    assert!(h.blobs.inner.is_empty());
    assert!(h.deleted_external_ids().is_empty());
}

#[tokio::test]
async fn test_delete_hands_failed_removals_to_consumer() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    h.blobs.set_remove_failure(true);

    h.coordinator
        .delete_media(record.media_id, None)
        .await
        .unwrap();

    assert!(h.record(record.media_id).await.is_none());
    let mut announced = h.deleted_external_ids();
    announced.sort();
    let mut expected = record.external_ids().as_array().to_vec();
    expected.sort();
    assert_eq!(announced, expected);
}

#[tokio::test]
async fn test_delete_registers_reclaim_when_bus_is_down() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    h.blobs.set_remove_failure(true);
    h.bus.set_publish_failure(true);

    h.coordinator
        .delete_media(record.media_id, None)
        .await
        .unwrap();

    let pending = h.metadata.pending_operations();
    assert_eq!(pending.len(), 2);
    assert!(pending
        .iter()
        .all(|op| op.kind == PendingOperationKind::Reclaim && op.bucket == BUCKET));
}

#[tokio::test]
async fn test_failed_delete_commit_leaves_everything() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.write_compressed_blob(&record).await;
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    h.metadata.fail_next_commit();

    let err = h
        .coordinator
        .delete_media(record.media_id, Some(1))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    assert!(h.record(record.media_id).await.is_some());
    assert!(h.blobs.contains(record.external_id_full));
    assert!(h.blobs.contains(record.external_id_compressed));
    assert!(h.deleted_external_ids().is_empty());
}

#[tokio::test]
async fn test_slow_blob_removal_is_handed_off_after_delete_budget() {
    let timeouts = LifecycleTimeouts {
        delete: Duration::from_millis(50),
        ..LifecycleTimeouts::default()
    };
    let h = harness_with(timeouts).await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.write_compressed_blob(&record).await;
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    h.blobs.set_remove_delay(Duration::from_millis(300));

    h.coordinator
        .delete_media(record.media_id, Some(1))
        .await
        .unwrap();

    assert!(h.record(record.media_id).await.is_none());
    let mut announced = h.deleted_external_ids();
    announced.sort();
    let mut expected = record.external_ids().as_array().to_vec();
    expected.sort();
    assert_eq!(announced, expected);

    // The timed-out removals were cancelled, so the consumer finishes the job.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(h.blobs.contains(record.external_id_full));
    h.blobs.set_remove_delay(Duration::ZERO);
    for id in expected {
        h.coordinator.on_orphan_blob_deleted(id).await.unwrap();
    }
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn test_hung_bus_does_not_hold_delete_past_compensation_budget() {
    let timeouts = LifecycleTimeouts {
        compensation: Duration::from_millis(100),
        ..LifecycleTimeouts::default()
    };
    let h = harness_with(timeouts).await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    h.blobs.set_remove_failure(true);
    h.bus.set_publish_delay(Duration::from_secs(5));

    let started = Instant::now();
    h.coordinator
        .delete_media(record.media_id, None)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let pending = h.metadata.pending_operations();
    assert_eq!(pending.len(), 2);
    assert!(pending
        .iter()
        .all(|op| op.kind == PendingOperationKind::Reclaim));
}

#[tokio::test]
async fn test_compression_is_idempotent() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    let event = MediaCompressed {
        media_id: record.media_id,
        external_id_compressed: Some(record.external_id_compressed),
    };

    assert_eq!(
        h.coordinator.on_compression_complete(&event).await.unwrap(),
        CompressionUpdate::Applied
    );
    assert_eq!(
        h.coordinator.on_compression_complete(&event).await.unwrap(),
        CompressionUpdate::AlreadyComplete
    );
    assert_eq!(
        h.status(record.media_id).await,
        Some(CompressionStatus::Complete)
    );
}

#[tokio::test]
async fn test_compression_for_settled_missing_media_is_ignored() {
    let h = harness().await;
    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: 99,
            external_id_compressed: Some(Uuid::new_v4()),
        })
        .await
        .unwrap();
    assert_eq!(update, CompressionUpdate::Missing);
}

#[tokio::test]
async fn test_compression_for_invisible_media_is_deferred() {
    let h = harness().await;

    // Without a compressed id nothing tells a pending write from a gone one.
    let err = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: 99,
            external_id_compressed: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotReady(_)));

    // A write that registered the id may still commit.
    let in_flight = Uuid::new_v4();
    h.metadata
        .register_pending(PendingOperationKind::Upload, BUCKET, &[in_flight])
        .await
        .unwrap();
    let err = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: 99,
            external_id_compressed: Some(in_flight),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotReady(_)));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_compression_event_overtaking_replace_commit_is_applied() {
    let h = harness().await;
    h.pointers.set_set_delay(Duration::from_millis(300));

    let coordinator = h.coordinator.clone();
    let replace =
        tokio::spawn(async move { coordinator.replace_profile_image(7, jpeg(256)).await });

    // The compressor reacts to `media.uploaded` while the pointer update, and
    // with it the commit, is still outstanding.
    let mut uploaded = Vec::new();
    for _ in 0..100 {
        uploaded = h.bus.published_json("media.uploaded");
        if !uploaded.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(uploaded.len(), 1);
    let media_id = uploaded[0]["mediaId"].as_i64().unwrap() as i32;
    let compressed: Uuid = uploaded[0]["externalIdCompressed"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id,
            external_id_compressed: Some(compressed),
        })
        .await
        .unwrap();
    let record = replace.await.unwrap().unwrap();

    assert_eq!(update, CompressionUpdate::Applied);
    assert_eq!(record.media_id, media_id);
    assert_eq!(h.status(media_id).await, Some(CompressionStatus::Complete));
}

#[tokio::test]
async fn test_late_variant_of_abandoned_upload_is_discarded() {
    let h = harness().await;
    h.metadata.fail_next_commit();

    h.coordinator.upload(1, jpeg(512)).await.unwrap_err();
    let uploaded = h.bus.published_json("media.uploaded");
    let compressed: Uuid = uploaded[0]["externalIdCompressed"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(h
        .metadata
        .pending_operations()
        .iter()
        .any(|op| op.kind == PendingOperationKind::Superseded && op.external_id == compressed));

    // The compressor finishes for a record that never committed.
    h.blobs
        .inner
        .put(BUCKET, &compressed.to_string(), bytes::Bytes::from_static(b"late"), "image/jpeg")
        .await
        .unwrap();
    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: uploaded[0]["mediaId"].as_i64().unwrap() as i32,
            external_id_compressed: Some(compressed),
        })
        .await
        .unwrap();

    assert_eq!(update, CompressionUpdate::Missing);
    assert!(!h.blobs.contains(compressed));
    assert!(h
        .metadata
        .pending_operations()
        .iter()
        .all(|op| op.external_id != compressed));
}

#[tokio::test]
async fn test_read_path_follows_compression_status() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();
    h.write_compressed_blob(&record).await;

    let served = h.coordinator.get_media(record.media_id).await.unwrap();
    assert_eq!(served.external_id, record.external_id_full);
    assert!(!served.compressed);
    assert_eq!(served.data.len(), 512);
    assert_eq!(served.content_type, "image/jpeg");

    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    let served = h.coordinator.get_media(record.media_id).await.unwrap();
    assert_eq!(served.external_id, record.external_id_compressed);
    assert!(served.compressed);
    assert_eq!(&served.data[..], b"compressed");
}

#[tokio::test]
async fn test_replace_creates_media_and_sets_pointer() {
    let h = harness().await;

    let record = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();

    assert_eq!(record.owner_id, 7);
    assert_eq!(h.pointers.pointer(7), Some(record.media_id));
    assert!(h.blobs.contains(record.external_id_full));
    assert!(h.metadata.pending_operations().is_empty());

    let served = h.coordinator.get_user_profile_image(7).await.unwrap();
    assert_eq!(served.media_id, record.media_id);
}

#[tokio::test]
async fn test_replace_rotates_and_reclaims_old_blobs_after_commit() {
    let h = harness().await;
    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    h.metadata
        .mark_compression_complete(first.media_id, None)
        .await
        .unwrap();

    let second = h
        .coordinator
        .replace_profile_image(7, jpeg(300))
        .await
        .unwrap();

    assert_eq!(second.media_id, first.media_id);
    assert_ne!(second.external_id_full, first.external_id_full);
    assert_eq!(second.compression_status, CompressionStatus::Started);
    assert_eq!(h.pointers.pointer(7), Some(first.media_id));

    let mut announced = h.deleted_external_ids();
    announced.sort();
    let mut old = first.external_ids().as_array().to_vec();
    old.sort();
    assert_eq!(announced, old);

    // Orphan handling removes the old blob; the new one is referenced.
    for id in old {
        h.coordinator.on_orphan_blob_deleted(id).await.unwrap();
    }
    assert!(!h.blobs.contains(first.external_id_full));
    assert!(h.blobs.contains(second.external_id_full));
}

#[tokio::test]
async fn test_failed_replace_keeps_old_blobs() {
    let h = harness().await;
    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    h.blobs.set_put_failure(true);

    let err = h
        .coordinator
        .replace_profile_image(7, jpeg(300))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Upstream { .. }));

    let current = h.record(first.media_id).await.unwrap();
    assert_eq!(current.external_ids(), first.external_ids());
    assert!(h.blobs.contains(first.external_id_full));
    // Only the never-visible new ids are announced.
    assert!(h
        .deleted_external_ids()
        .iter()
        .all(|id| !first.references(*id)));
}

#[tokio::test]
async fn test_commit_failure_restores_previous_pointer() {
    let h = harness().await;
    h.pointers
        .set_profile_media_id(7, Some(500))
        .await
        .unwrap();
    h.metadata.fail_next_commit();

    let err = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Database(_)));

    // Pointer was dangling before and is dangling again, not pointing at
    // the rolled-back record.
    assert_eq!(h.pointers.pointer(7), Some(500));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert_eq!(h.deleted_external_ids().len(), 2);
}

#[tokio::test]
async fn test_timed_out_replace_restores_previous_pointer() {
    let timeouts = LifecycleTimeouts {
        replace: Duration::from_millis(100),
        ..LifecycleTimeouts::default()
    };
    let h = harness_with(timeouts).await;
    h.pointers
        .set_profile_media_id(7, Some(500))
        .await
        .unwrap();
    h.pointers.set_set_delay(Duration::from_millis(300));

    let err = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Timeout {
            operation: "replace",
            ..
        }
    ));
    assert_eq!(h.pointers.pointer(7), Some(500));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert_eq!(h.deleted_external_ids().len(), 2);
    // `media.uploaded` went out before the timeout; the compressed id is
    // watched until the compressor deadline.
    assert!(h
        .metadata
        .pending_operations()
        .iter()
        .any(|op| op.kind == PendingOperationKind::Superseded));
}

#[tokio::test]
async fn test_dangling_pointer_gets_new_media() {
    let h = harness().await;
    h.pointers
        .set_profile_media_id(7, Some(500))
        .await
        .unwrap();

    let err = h.coordinator.get_user_profile_image(7).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let record = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    assert_ne!(record.media_id, 500);
    assert_eq!(h.pointers.pointer(7), Some(record.media_id));
}

#[tokio::test]
async fn test_profile_image_without_pointer_is_not_found() {
    let h = harness().await;
    let err = h.coordinator.get_user_profile_image(3).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_unreachable_identity_service_fails_replace() {
    let h = harness().await;
    h.pointers.set_get_failure(true);

    let err = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Upstream { .. }));
    assert!(h.coordinator.list_media().await.unwrap().is_empty());
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn test_stale_compression_does_not_complete_rotated_record() {
    let h = harness().await;
    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    let second = h
        .coordinator
        .replace_profile_image(7, jpeg(300))
        .await
        .unwrap();

    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: first.media_id,
            external_id_compressed: Some(first.external_id_compressed),
        })
        .await
        .unwrap();

    assert_eq!(update, CompressionUpdate::Stale);
    assert_eq!(
        h.status(second.media_id).await,
        Some(CompressionStatus::Started)
    );
}

#[tokio::test]
async fn test_rotation_during_compression_discards_late_variant() {
    let h = harness().await;
    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    h.coordinator
        .replace_profile_image(7, jpeg(300))
        .await
        .unwrap();

    // The orphan consumer runs before the old compressor finished.
    for id in first.external_ids().as_array() {
        h.coordinator.on_orphan_blob_deleted(id).await.unwrap();
    }
    let pending = h.metadata.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, PendingOperationKind::Superseded);
    assert_eq!(pending[0].external_id, first.external_id_compressed);

    // It then writes the old variant and reports it.
    h.write_compressed_blob(&first).await;
    let update = h
        .coordinator
        .on_compression_complete(&MediaCompressed {
            media_id: first.media_id,
            external_id_compressed: Some(first.external_id_compressed),
        })
        .await
        .unwrap();

    assert_eq!(update, CompressionUpdate::Stale);
    assert!(!h.blobs.contains(first.external_id_compressed));
    assert!(h.metadata.pending_operations().is_empty());
}

#[tokio::test]
async fn test_orphan_removal_skips_referenced_blob() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(512)).await.unwrap();

    let outcome = h
        .coordinator
        .on_orphan_blob_deleted(record.external_id_full)
        .await
        .unwrap();

    assert_eq!(outcome, socialstream_services::OrphanRemoval::StillReferenced);
    assert!(h.blobs.contains(record.external_id_full));
}

#[tokio::test]
async fn test_orphan_removal_of_absent_blob_succeeds() {
    let h = harness().await;
    let outcome = h
        .coordinator
        .on_orphan_blob_deleted(uuid::Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(outcome, socialstream_services::OrphanRemoval::Removed);
}

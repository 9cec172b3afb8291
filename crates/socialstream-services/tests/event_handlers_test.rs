//! Media service queue handling: routing, classification and the consumer
//! loop end to end.
//!
//! Run with: `cargo test -p socialstream-services --test event_handlers_test`

mod helpers;

use helpers::{delivery, harness, jpeg};
use serde_json::json;
use socialstream_bus::{publish_event, EventSource};
use socialstream_core::constants::MEDIA_SERVICE_QUEUE;
use socialstream_core::models::{CompressionStatus, MediaCompressed};
use socialstream_core::ConsumerSettings;
use socialstream_db::MetadataStore;
use socialstream_services::MediaEventHandler;
use socialstream_worker::{EventConsumer, EventConsumerConfig, EventHandler};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_compressed_event_completes_media() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(128)).await.unwrap();
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    handler
        .clone()
        .handle(&delivery(
            "media.compressed",
            json!({"mediaId": record.media_id}),
        ))
        .await
        .unwrap();
    // Redelivery is acknowledged as well.
    handler
        .handle(&delivery(
            "media.compressed",
            json!({"mediaId": record.media_id}),
        ))
        .await
        .unwrap();

    assert_eq!(
        h.status(record.media_id).await,
        Some(CompressionStatus::Complete)
    );
}

#[tokio::test]
async fn test_compressed_event_for_invisible_media_is_retried() {
    let h = harness().await;
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    let err = handler
        .handle(&delivery("media.compressed", json!({"mediaId": 404})))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_malformed_payload_is_unrecoverable() {
    let h = harness().await;
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    let err = handler
        .handle(&delivery("media.compressed", json!({"media": "one"})))
        .await
        .unwrap_err();
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_unknown_routing_key_is_unrecoverable() {
    let h = harness().await;
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    let err = handler
        .handle(&delivery("media.resized", json!({"mediaId": 1})))
        .await
        .unwrap_err();
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_delete_request_for_compressing_media_is_retried() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(128)).await.unwrap();
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    let err = handler
        .handle(&delivery(
            "media.deleted",
            json!({"mediaId": record.media_id}),
        ))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(h.record(record.media_id).await.is_some());
}

#[tokio::test]
async fn test_delete_request_for_missing_media_is_acked() {
    let h = harness().await;
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    handler
        .handle(&delivery("media.deleted", json!({"mediaId": 404})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_request_skips_owner_check() {
    let h = harness().await;
    let record = h.coordinator.upload(1, jpeg(128)).await.unwrap();
    h.metadata
        .mark_compression_complete(record.media_id, None)
        .await
        .unwrap();
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    handler
        .handle(&delivery(
            "media.deleted",
            json!({"mediaId": record.media_id}),
        ))
        .await
        .unwrap();
    assert!(h.record(record.media_id).await.is_none());
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn test_blob_removal_failure_is_retried() {
    let h = harness().await;
    h.blobs.set_remove_failure(true);
    let handler = Arc::new(MediaEventHandler::new(h.coordinator.clone()));

    let err = handler
        .handle(&delivery(
            "media.externalId.deleted",
            json!({"externalId": uuid::Uuid::new_v4()}),
        ))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_consumer_drives_compression_and_orphan_cleanup() {
    let h = harness().await;
    let settings = ConsumerSettings {
        poll_interval: Duration::from_millis(10),
        ..ConsumerSettings::default()
    };
    let handler: Arc<dyn EventHandler> =
        Arc::new(MediaEventHandler::new(h.coordinator.clone()));
    let consumer = EventConsumer::new(
        h.bus.clone(),
        EventConsumerConfig::from_settings(MEDIA_SERVICE_QUEUE, &settings),
        Arc::downgrade(&handler),
        None,
    );

    let first = h
        .coordinator
        .replace_profile_image(7, jpeg(128))
        .await
        .unwrap();
    publish_event(
        h.bus.as_ref(),
        &MediaCompressed {
            media_id: first.media_id,
            external_id_compressed: Some(first.external_id_compressed),
        },
    )
    .await
    .unwrap();

    let shared = &h;
    let media_id = first.media_id;
    wait_until(|| async move {
        shared.status(media_id).await == Some(CompressionStatus::Complete)
    })
    .await;

    // Rotation announces the old ids; the consumer removes the old blob.
    let second = h
        .coordinator
        .replace_profile_image(7, jpeg(256))
        .await
        .unwrap();
    let old_full = first.external_id_full;
    wait_until(|| async move { !shared.blobs.contains(old_full) }).await;
    wait_until(|| async move { shared.bus.queue_len(MEDIA_SERVICE_QUEUE) == 0 }).await;

    assert!(h.blobs.contains(second.external_id_full));
    assert!(h.bus.claim(MEDIA_SERVICE_QUEUE).await.unwrap().is_none());
    consumer.shutdown().await;
}

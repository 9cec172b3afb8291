//! Routing of media service queue deliveries to the coordinator.

use anyhow::anyhow;
use async_trait::async_trait;
use socialstream_bus::Delivery;
use socialstream_core::constants::routing_keys;
use socialstream_core::models::{DomainEvent, ExternalIdDeleted, MediaCompressed, MediaDeleted};
use socialstream_core::{AppError, HandlerError};
use socialstream_worker::EventHandler;
use std::sync::Arc;

use crate::coordinator::MediaLifecycleCoordinator;

pub struct MediaEventHandler {
    coordinator: Arc<MediaLifecycleCoordinator>,
}

impl MediaEventHandler {
    pub fn new(coordinator: Arc<MediaLifecycleCoordinator>) -> Self {
        Self { coordinator }
    }
}

fn decode<E: DomainEvent>(delivery: &Delivery) -> Result<E, HandlerError> {
    serde_json::from_slice(&delivery.payload)
        .map_err(|e| HandlerError::malformed(&delivery.routing_key, e))
}

#[async_trait]
impl EventHandler for MediaEventHandler {
    async fn handle(self: Arc<Self>, delivery: &Delivery) -> Result<(), HandlerError> {
        match delivery.routing_key.as_str() {
            routing_keys::MEDIA_COMPRESSED => {
                let event: MediaCompressed = decode(delivery)?;
                self.coordinator.on_compression_complete(&event).await?;
            }
            routing_keys::MEDIA_DELETED => {
                let event: MediaDeleted = decode(delivery)?;
                match self.coordinator.delete_media(event.media_id, None).await {
                    Ok(()) => {}
                    Err(AppError::NotFound(_)) => {
                        tracing::debug!(media_id = event.media_id, "Media already deleted");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            routing_keys::EXTERNAL_ID_DELETED => {
                let event: ExternalIdDeleted = decode(delivery)?;
                self.coordinator
                    .on_orphan_blob_deleted(event.external_id)
                    .await?;
            }
            other => {
                return Err(HandlerError::unrecoverable(anyhow!(
                    "No handler for routing key {}",
                    other
                )));
            }
        }
        Ok(())
    }
}

//! Blob store setup

use anyhow::{Context, Result};
use socialstream_core::Config;
use socialstream_storage::{create_blob_store, BlobStore};
use std::sync::Arc;

pub async fn setup_storage(config: &Config) -> Result<Arc<dyn BlobStore>> {
    tracing::info!("Initializing blob store...");
    let blobs = create_blob_store(config)
        .await
        .context("Failed to initialize blob store")?;
    tracing::info!(
        backend = ?blobs.backend_type(),
        bucket = %config.media_bucket(),
        "Blob store initialized successfully"
    );
    Ok(blobs)
}

//! Application setup and initialization
//!
//! Everything `main` needs between loading configuration and serving:
//! telemetry, database, blob store, event bus, background workers and routes.

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use crate::state::AppState;
use crate::telemetry::{init_telemetry, LogFormat};
use anyhow::{Context, Result};
use socialstream_core::Config;
use std::sync::Arc;

pub use services::BackgroundTasks;

/// Initialize the entire application
pub async fn initialize_app(
    config: Config,
) -> Result<(Arc<AppState>, axum::Router, BackgroundTasks)> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    init_telemetry(LogFormat::from_env(), config.environment())
        .context("Failed to initialize telemetry")?;

    tracing::info!("Configuration loaded and validated successfully");

    // Setup database
    let pool = database::setup_database(&config).await?;

    // Setup blob store
    let blobs = storage::setup_storage(&config).await?;

    // Bus, coordinator, consumer and reconciliation
    let (state, background) = services::initialize_services(&config, pool, blobs).await?;

    // Setup routes
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router, background))
}

//! Service initialization: event bus, identity service client, coordinator,
//! media service consumer and reconciliation sweep.

use crate::state::AppState;
use anyhow::{Context, Result};
use socialstream_bus::{EventPublisher, EventSource, PgEventBus};
use socialstream_core::constants::{MEDIA_SERVICE_BINDINGS, MEDIA_SERVICE_QUEUE};
use socialstream_core::validation::UploadValidator;
use socialstream_core::Config;
use socialstream_db::{MediaRepository, MetadataStore};
use socialstream_services::{
    HttpProfilePointerClient, MediaEventHandler, MediaLifecycleCoordinator, ProfilePointerClient,
    ReconciliationService,
};
use socialstream_storage::BlobStore;
use socialstream_worker::{EventConsumer, EventConsumerConfig, EventHandler};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Workers that run next to the HTTP server.
pub struct BackgroundTasks {
    consumer: EventConsumer,
    // The consumer only holds a weak reference; this keeps the handler alive.
    handler: Arc<dyn EventHandler>,
    reconciliation: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Stop claiming new deliveries and stop the sweep.
    pub async fn shutdown(self) {
        self.consumer.shutdown().await;
        if let Some(handle) = self.reconciliation {
            handle.abort();
        }
        drop(self.handler);
        tracing::info!("Background tasks stopped");
    }
}

/// Coordinator over the given collaborators, with budgets, bucket and upload
/// limits taken from `config`.
pub fn build_coordinator(
    config: &Config,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventPublisher>,
    pointers: Arc<dyn ProfilePointerClient>,
) -> Arc<MediaLifecycleCoordinator> {
    Arc::new(MediaLifecycleCoordinator::new(
        metadata,
        blobs,
        events,
        pointers,
        config.media_bucket(),
        config.timeouts(),
        UploadValidator::new(
            config.max_file_size_bytes(),
            config.allowed_content_types().to_vec(),
        ),
    ))
}

pub async fn initialize_services(
    config: &Config,
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
) -> Result<(Arc<AppState>, BackgroundTasks)> {
    let consumer_settings = config.consumer();

    let metadata: Arc<dyn MetadataStore> = Arc::new(MediaRepository::new(pool.clone()));
    let bus = Arc::new(PgEventBus::new(
        pool.clone(),
        consumer_settings.visibility_timeout,
        consumer_settings.requeue_delay,
    ));

    bus.declare_queue(MEDIA_SERVICE_QUEUE, &MEDIA_SERVICE_BINDINGS)
        .await
        .context("Failed to declare media service queue")?;
    tracing::info!(
        queue = MEDIA_SERVICE_QUEUE,
        bindings = ?MEDIA_SERVICE_BINDINGS,
        "Media service queue declared"
    );

    // The pointer RPC runs inside the replace budget; the client timeout only
    // bounds a call nobody is waiting for any more.
    let pointers = Arc::new(
        HttpProfilePointerClient::new(config.user_service_url(), config.timeouts().replace)
            .context("Failed to build identity service client")?,
    );
    tracing::info!(
        user_service_url = %config.user_service_url(),
        "Identity service client initialized"
    );

    let coordinator = build_coordinator(
        config,
        metadata.clone(),
        blobs.clone(),
        bus.clone(),
        pointers,
    );
    tracing::info!(
        bucket = %coordinator.bucket(),
        timeouts = ?coordinator.timeouts(),
        "Media lifecycle coordinator initialized"
    );

    let handler: Arc<dyn EventHandler> = Arc::new(MediaEventHandler::new(coordinator.clone()));
    let consumer = EventConsumer::new(
        bus.clone(),
        EventConsumerConfig::from_settings(MEDIA_SERVICE_QUEUE, &consumer_settings),
        Arc::downgrade(&handler),
        Some(pool),
    );

    let reconciliation = if config.reconcile_interval_secs() > 0 {
        let service = Arc::new(ReconciliationService::new(
            metadata,
            blobs,
            Duration::from_secs(config.reconcile_interval_secs()),
            Duration::from_secs(config.reconcile_grace_secs()),
            Duration::from_secs(config.compression_deadline_secs()),
        ));
        tracing::info!(
            interval_secs = config.reconcile_interval_secs(),
            grace_secs = config.reconcile_grace_secs(),
            compression_deadline_secs = config.compression_deadline_secs(),
            "Reconciliation sweep started"
        );
        Some(service.start())
    } else {
        tracing::info!("Reconciliation sweep disabled");
        None
    };

    let state = Arc::new(AppState {
        coordinator,
        config: config.clone(),
    });

    Ok((
        state,
        BackgroundTasks {
            consumer,
            handler,
            reconciliation,
        },
    ))
}

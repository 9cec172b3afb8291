//! Test helpers: the real router and coordinator over in-memory stores.
//!
//! Run from workspace root: `cargo test -p socialstream-api`.

#![allow(dead_code)]

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use bytes::Bytes;
use socialstream_api::setup::routes::setup_routes;
use socialstream_api::setup::services::build_coordinator;
use socialstream_api::AppState;
use socialstream_bus::{EventSource, MemoryEventBus};
use socialstream_core::constants::{MEDIA_SERVICE_BINDINGS, MEDIA_SERVICE_QUEUE};
use socialstream_core::{
    BaseConfig, Config, ConsumerSettings, LifecycleTimeouts, MediaServiceConfig, StorageBackend,
};
use socialstream_db::MemoryMetadataStore;
use socialstream_services::{MediaLifecycleCoordinator, MemoryProfilePointers};
use socialstream_storage::MemoryBlobStore;
use std::sync::Arc;

pub const BUCKET: &str = "media";
pub const API: &str = "/api/v1/media";

pub struct TestApp {
    pub server: TestServer,
    pub metadata: MemoryMetadataStore,
    pub blobs: Arc<MemoryBlobStore>,
    pub bus: Arc<MemoryEventBus>,
    pub pointers: Arc<MemoryProfilePointers>,
    pub coordinator: Arc<MediaLifecycleCoordinator>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub fn create_test_config() -> Config {
    let base = BaseConfig {
        server_port: 4000,
        cors_origins: vec!["*".to_string()],
        db_max_connections: 5,
        db_timeout_seconds: 30,
        environment: "test".to_string(),
    };
    Config(Box::new(MediaServiceConfig {
        base,
        database_url: "postgres://unused".to_string(),
        storage_backend: StorageBackend::Local,
        media_bucket: BUCKET.to_string(),
        s3_region: None,
        s3_endpoint: None,
        local_storage_path: None,
        user_service_url: "http://localhost:4001".to_string(),
        max_file_size_bytes: 1024 * 1024,
        allowed_content_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        timeouts: LifecycleTimeouts::default(),
        consumer: ConsumerSettings::default(),
        reconcile_interval_secs: 0,
        reconcile_grace_secs: 60,
        compression_deadline_secs: 3600,
    }))
}

pub async fn setup_test_app() -> TestApp {
    let config = create_test_config();
    let metadata = MemoryMetadataStore::new();
    let blobs = Arc::new(MemoryBlobStore::new());
    let bus = Arc::new(MemoryEventBus::new());
    let pointers = Arc::new(MemoryProfilePointers::new());

    bus.declare_queue(MEDIA_SERVICE_QUEUE, &MEDIA_SERVICE_BINDINGS)
        .await
        .expect("Failed to declare queue");

    let coordinator = build_coordinator(
        &config,
        Arc::new(metadata.clone()),
        blobs.clone(),
        bus.clone(),
        pointers.clone(),
    );
    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        config: config.clone(),
    });

    let app = setup_routes(&config, state).expect("Failed to setup routes");
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        metadata,
        blobs,
        bus,
        pointers,
        coordinator,
    }
}

/// `size` bytes starting with a JPEG SOI marker.
pub fn jpeg_bytes(size: usize) -> Bytes {
    let mut data = vec![0u8; size];
    if size >= 3 {
        data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    }
    Bytes::from(data)
}

pub fn image_form(field: &str, data: Bytes, mime_type: &str) -> MultipartForm {
    let part = Part::bytes(data).file_name("image.jpg").mime_type(mime_type);
    MultipartForm::new().add_part(field.to_string(), part)
}

/// Upload through the API and return the new media id.
pub async fn upload_jpeg(client: &TestServer, owner_id: i32, size: usize) -> i32 {
    let response = client
        .post(API)
        .add_header("x-user-id", owner_id.to_string())
        .multipart(image_form("file", jpeg_bytes(size), "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let body: serde_json::Value = response.json();
    body["mediaId"]
        .as_i64()
        .expect("Expected 'mediaId' in upload response") as i32
}

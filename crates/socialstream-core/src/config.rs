//! Configuration module
//!
//! Settings for the media service: database, blob store, identity service,
//! operation budgets, event consumer and reconciliation.

use std::env;
use std::time::Duration;

use crate::constants::DEFAULT_MEDIA_BUCKET;
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Base configuration shared by the HTTP server and the background workers
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
}

/// Time budgets for each lifecycle operation.
///
/// A side effect that does not finish within its budget is cancelled and the
/// metadata transaction rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub upload: Duration,
    pub delete: Duration,
    pub replace: Duration,
    pub read: Duration,
    pub consumer_removal: Duration,
    /// Per call budget for compensation: orphan announcements, reclaim
    /// publishes and pointer restores after a failed write.
    pub compensation: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_millis(1000),
            delete: Duration::from_millis(5000),
            replace: Duration::from_millis(1500),
            read: Duration::from_millis(500),
            consumer_removal: Duration::from_millis(2000),
            compensation: Duration::from_millis(1000),
        }
    }
}

/// Event consumer settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub max_workers: usize,
    pub poll_interval: Duration,
    /// How long a claimed message stays invisible before another worker may claim it.
    pub visibility_timeout: Duration,
    /// Delay before a requeued message becomes claimable again.
    pub requeue_delay: Duration,
    /// Recoverable failures older than this are dropped instead of requeued.
    pub poison_message_age: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(1000),
            visibility_timeout: Duration::from_secs(30),
            requeue_delay: Duration::from_millis(500),
            poison_message_age: Duration::from_secs(10),
        }
    }
}

/// Media service configuration
#[derive(Clone, Debug)]
pub struct MediaServiceConfig {
    pub base: BaseConfig,
    pub database_url: String,
    // Blob store
    pub storage_backend: StorageBackend,
    pub media_bucket: String,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    // Identity service
    pub user_service_url: String,
    // Upload validation
    pub max_file_size_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub timeouts: LifecycleTimeouts,
    pub consumer: ConsumerSettings,
    /// Seconds between reconciliation sweeps. 0 = disabled.
    pub reconcile_interval_secs: u64,
    /// Pending operations younger than this are left alone by the sweep.
    pub reconcile_grace_secs: u64,
    /// How long after its record moved on a compressor may still write a
    /// compressed variant. Superseded ids are swept until then.
    pub compression_deadline_secs: u64,
}

/// Application configuration (media service).
#[derive(Clone, Debug)]
pub struct Config(pub Box<MediaServiceConfig>);

impl Config {
    fn as_media(&self) -> &MediaServiceConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.as_media().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = MediaServiceConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_media().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_media().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_media().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_media().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_media().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_media().base.db_timeout_seconds
    }

    pub fn database_url(&self) -> &str {
        &self.as_media().database_url
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_media().storage_backend
    }

    pub fn media_bucket(&self) -> &str {
        &self.as_media().media_bucket
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_media().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_media().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_media().local_storage_path.as_deref()
    }

    pub fn user_service_url(&self) -> &str {
        &self.as_media().user_service_url
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.as_media().max_file_size_bytes
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.as_media().allowed_content_types
    }

    pub fn timeouts(&self) -> LifecycleTimeouts {
        self.as_media().timeouts
    }

    pub fn consumer(&self) -> ConsumerSettings {
        self.as_media().consumer
    }

    pub fn reconcile_interval_secs(&self) -> u64 {
        self.as_media().reconcile_interval_secs
    }

    pub fn reconcile_grace_secs(&self) -> u64 {
        self.as_media().reconcile_grace_secs
    }

    pub fn compression_deadline_secs(&self) -> u64 {
        self.as_media().compression_deadline_secs
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl MediaServiceConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const MAX_FILE_SIZE_MB: usize = 10;
        const RECONCILE_INTERVAL_SECS: u64 = 300;
        const RECONCILE_GRACE_SECS: u64 = 60;
        const COMPRESSION_DEADLINE_SECS: u64 = 3600;
        const DEFAULT_ALLOWED_CONTENT_TYPES: &str =
            "image/jpeg,image/png,image/heic,image/heif,image/webp,image/gif";

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let max_file_size_mb = env::var("MAX_FILE_SIZE_MB")
            .unwrap_or_else(|_| MAX_FILE_SIZE_MB.to_string())
            .parse::<usize>()
            .unwrap_or(MAX_FILE_SIZE_MB);

        let allowed_content_types = env::var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_CONTENT_TYPES.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment,
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::S3,
        };

        let default_timeouts = LifecycleTimeouts::default();
        let timeouts = LifecycleTimeouts {
            upload: env_millis("UPLOAD_TIMEOUT_MS", default_timeouts.upload),
            delete: env_millis("DELETE_TIMEOUT_MS", default_timeouts.delete),
            replace: env_millis("REPLACE_TIMEOUT_MS", default_timeouts.replace),
            read: env_millis("READ_TIMEOUT_MS", default_timeouts.read),
            consumer_removal: env_millis(
                "CONSUMER_REMOVAL_TIMEOUT_MS",
                default_timeouts.consumer_removal,
            ),
            compensation: env_millis("COMPENSATION_TIMEOUT_MS", default_timeouts.compensation),
        };

        let default_consumer = ConsumerSettings::default();
        let consumer = ConsumerSettings {
            max_workers: env::var("CONSUMER_MAX_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default_consumer.max_workers),
            poll_interval: env_millis("CONSUMER_POLL_INTERVAL_MS", default_consumer.poll_interval),
            visibility_timeout: env_secs(
                "BUS_VISIBILITY_TIMEOUT_SECS",
                default_consumer.visibility_timeout,
            ),
            requeue_delay: env_millis("BUS_REQUEUE_DELAY_MS", default_consumer.requeue_delay),
            poison_message_age: env_secs(
                "POISON_MESSAGE_AGE_SECS",
                default_consumer.poison_message_age,
            ),
        };

        let config = MediaServiceConfig {
            base,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            storage_backend,
            media_bucket: env::var("MEDIA_BUCKET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_MEDIA_BUCKET.to_string()),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            user_service_url: env::var("USER_SERVICE_URL")
                .map_err(|_| anyhow::anyhow!("USER_SERVICE_URL must be set"))?,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_content_types,
            timeouts,
            consumer,
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| RECONCILE_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(RECONCILE_INTERVAL_SECS),
            reconcile_grace_secs: env::var("RECONCILE_GRACE_SECS")
                .unwrap_or_else(|_| RECONCILE_GRACE_SECS.to_string())
                .parse()
                .unwrap_or(RECONCILE_GRACE_SECS),
            compression_deadline_secs: env::var("COMPRESSION_DEADLINE_SECS")
                .unwrap_or_else(|_| COMPRESSION_DEADLINE_SECS.to_string())
                .parse()
                .unwrap_or(COMPRESSION_DEADLINE_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !self.user_service_url.starts_with("http://")
            && !self.user_service_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("USER_SERVICE_URL must be an http(s) URL"));
        }

        if self.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }

        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_CONTENT_TYPES must name at least one content type"
            ));
        }

        if self.consumer.max_workers == 0 {
            return Err(anyhow::anyhow!("CONSUMER_MAX_WORKERS must be greater than 0"));
        }

        let budgets = [
            ("UPLOAD_TIMEOUT_MS", self.timeouts.upload),
            ("DELETE_TIMEOUT_MS", self.timeouts.delete),
            ("REPLACE_TIMEOUT_MS", self.timeouts.replace),
            ("READ_TIMEOUT_MS", self.timeouts.read),
            ("CONSUMER_REMOVAL_TIMEOUT_MS", self.timeouts.consumer_removal),
            ("COMPENSATION_TIMEOUT_MS", self.timeouts.compensation),
        ];
        if let Some((name, _)) = budgets.iter().find(|(_, budget)| budget.is_zero()) {
            return Err(anyhow::anyhow!("{} must be greater than 0", name));
        }

        // Pending rows are written before the transaction opens, so the sweep
        // must not reach them while the write can still commit.
        let longest_write = self.timeouts.upload.max(self.timeouts.replace)
            + Duration::from_secs(self.base.db_timeout_seconds);
        if Duration::from_secs(self.reconcile_grace_secs) <= longest_write {
            return Err(anyhow::anyhow!(
                "RECONCILE_GRACE_SECS must exceed the longest write budget plus DB_TIMEOUT_SECONDS ({} ms)",
                longest_write.as_millis()
            ));
        }

        if self.compression_deadline_secs < self.reconcile_grace_secs {
            return Err(anyhow::anyhow!(
                "COMPRESSION_DEADLINE_SECS must not be shorter than RECONCILE_GRACE_SECS"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_region.is_none() && self.s3_endpoint.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or S3_ENDPOINT must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

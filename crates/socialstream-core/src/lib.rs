//! Socialstream Core Library
//!
//! This crate provides the domain models, event payloads, error types,
//! configuration and upload validation shared by every socialstream media
//! component.

pub mod config;
pub mod constants;
pub mod error;
pub mod handler_error;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{BaseConfig, Config, ConsumerSettings, LifecycleTimeouts, MediaServiceConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use handler_error::{HandlerError, HandlerResultExt};
pub use storage_types::StorageBackend;
// Note: BlobStore and StorageError live in socialstream-storage

//! Socialstream Storage Library
//!
//! Blob store abstraction for media bytes. A blob is an immutable object
//! addressed by `(bucket, key)`, where the key is the string form of an
//! external id. Backends: S3 (and S3-compatible providers) through
//! `object_store`, the local filesystem, and an in-memory store for tests.
//!
//! # Key format
//!
//! Keys are opaque to the backends but must not contain `..`, a leading `/`
//! or be empty. Validation is centralized in the `keys` module so all backends
//! agree on what they accept.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_store;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryBlobStore;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use socialstream_core::StorageBackend;
pub use traits::{BlobInfo, BlobObject, BlobStore, StorageError, StorageResult};

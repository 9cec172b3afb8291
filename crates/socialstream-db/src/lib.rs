//! Socialstream Database Layer
//!
//! Metadata store for media records: the `MetadataStore` / `MetadataTx`
//! traits, the Postgres implementation, the pending blob operation registry
//! and an in-memory implementation behind the `memory` feature.

pub mod db;

// Re-exports: store traits
pub use db::store::{CompressionUpdate, IsolationLevel, MetadataStore, MetadataTx};

// Re-exports: Postgres repositories
pub use db::media_store::{MediaRepository, PgMetadataTx};
pub use db::pending::PendingOperationRepository;

// Re-exports: Transaction utilities
pub use db::transaction::TransactionGuard;

#[cfg(feature = "memory")]
pub use db::memory::MemoryMetadataStore;

//! Database repositories for the metadata store
//!
//! `store` holds the traits the coordinator programs against, `media_store`
//! and `pending` the Postgres implementations, `memory` an in-process one.

pub mod media_store;
#[cfg(feature = "memory")]
pub mod memory;
pub mod pending;
pub mod store;
pub mod transaction;

//! Data models for the media service
//!
//! Records persisted in the metadata store, the payloads exchanged on the
//! event bus, and the pending blob operations used for reconciliation.

mod events;
mod media;
mod pending;

pub use events::*;
pub use media::*;
pub use pending::*;

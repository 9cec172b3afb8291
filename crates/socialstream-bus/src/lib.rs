//! Socialstream Event Bus
//!
//! Topic-exchange publish and durable queue consumption with explicit
//! acknowledgement. The Postgres backend stores one row per (queue, message)
//! and wakes consumers with `pg_notify`; the in-memory backend serves tests.

pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
pub mod postgres;
pub mod topic;
pub mod traits;

pub use error::{BusError, BusResult};
#[cfg(feature = "memory")]
pub use memory::MemoryEventBus;
pub use postgres::{PgEventBus, BUS_NOTIFY_CHANNEL};
pub use topic::topic_matches;
pub use traits::{publish_event, Delivery, EventPublisher, EventSource};

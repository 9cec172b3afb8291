//! Event handler trait
//!
//! The services layer implements this for its routing table. The consumer
//! calls `handle` for every claimed delivery; the implementation matches on
//! the routing key and invokes the right operation.

use anyhow::anyhow;
use async_trait::async_trait;
use socialstream_bus::Delivery;
use socialstream_core::HandlerError;
use std::sync::{Arc, Weak};

/// Dispatch target for claimed deliveries.
///
/// The consumer holds a weak reference so that dropping the application
/// state stops dispatch without a reference cycle.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(self: Arc<Self>, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Placeholder used before the real handler exists. Always fails recoverably
/// so nothing is lost.
struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn handle(self: Arc<Self>, delivery: &Delivery) -> Result<(), HandlerError> {
        Err(HandlerError::recoverable(anyhow!(
            "no handler available for {}",
            delivery.routing_key
        )))
    }
}

/// Returns a weak reference to a handler that is already gone.
pub fn empty_handler_weak() -> Weak<dyn EventHandler> {
    let handler: Arc<dyn EventHandler> = Arc::new(NoopHandler);
    Arc::downgrade(&handler)
}

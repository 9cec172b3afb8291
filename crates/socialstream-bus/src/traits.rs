//! Event bus traits

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use socialstream_core::models::DomainEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::BusResult;

/// A claimed message. It stays invisible to other consumers until it is
/// acked, nacked, or its visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub queue: String,
    pub routing_key: String,
    pub payload: Bytes,
    /// When the message was first published; drives the poison threshold.
    pub published_at: DateTime<Utc>,
    /// Number of times this message has been claimed, including this one.
    pub delivery_count: i32,
}

impl Delivery {
    /// Time since first publication.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.published_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Fire-and-forget topic publish.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Fan the message out to every queue with a matching binding. A message
    /// with no matching binding is discarded.
    async fn publish(&self, routing_key: &str, payload: Bytes) -> BusResult<()>;
}

/// Durable queue consumption with explicit acknowledgement.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Create the queue and its bindings if missing. Idempotent.
    async fn declare_queue(&self, queue: &str, bindings: &[&str]) -> BusResult<()>;

    /// Claim the next available message, if any.
    async fn claim(&self, queue: &str) -> BusResult<Option<Delivery>>;

    /// Remove a handled message.
    async fn ack(&self, delivery: &Delivery) -> BusResult<()>;

    /// Give a message back (`requeue`) or drop it.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BusResult<()>;

    /// Make messages whose visibility timeout lapsed claimable again.
    /// Returns how many were released.
    async fn release_expired(&self, queue: &str) -> BusResult<u64>;

    /// In-process wake-up signal, for backends that can offer one.
    fn wakeups(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Serialize a domain event and publish it under its routing key.
pub async fn publish_event<E: DomainEvent + Sync>(
    publisher: &dyn EventPublisher,
    event: &E,
) -> BusResult<()> {
    let payload = serde_json::to_vec(event)?;
    publisher.publish(E::ROUTING_KEY, Bytes::from(payload)).await
}

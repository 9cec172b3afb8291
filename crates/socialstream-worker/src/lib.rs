//! Socialstream Worker
//!
//! Durable event consumption: claims deliveries from an [`EventSource`],
//! dispatches them to an [`EventHandler`] under a bounded worker pool and
//! settles each one with ack, requeue or drop.
//!
//! [`EventSource`]: socialstream_bus::EventSource

pub mod consumer;
pub mod handler;

pub use consumer::{decide_outcome, DeliveryOutcome, EventConsumer, EventConsumerConfig};
pub use handler::{empty_handler_weak, EventHandler};

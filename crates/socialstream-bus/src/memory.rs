use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::error::{BusError, BusResult};
use crate::topic::{topic_matches, validate_pattern};
use crate::traits::{Delivery, EventPublisher, EventSource};

struct StoredMessage {
    queue: String,
    routing_key: String,
    payload: Bytes,
    published_at: DateTime<Utc>,
    available_at: Instant,
    locked_until: Option<Instant>,
    delivery_count: i32,
}

#[derive(Default)]
struct BusState {
    bindings: Vec<(String, String)>,
    messages: BTreeMap<i64, StoredMessage>,
    next_id: i64,
    /// Every successful publish, in order, including unrouted ones.
    published: Vec<(String, Bytes)>,
}

/// In-process topic exchange.
pub struct MemoryEventBus {
    state: Mutex<BusState>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
    requeue_delay: Duration,
    fail_publish: AtomicBool,
    publish_delay_ms: AtomicU64,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_timings(Duration::from_secs(30), Duration::ZERO)
    }

    pub fn with_timings(visibility_timeout: Duration, requeue_delay: Duration) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
            requeue_delay,
            fail_publish: AtomicBool::new(false),
            publish_delay_ms: AtomicU64::new(0),
        }
    }

    fn state(&self) -> BusResult<MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| BusError::ConsumeFailed("memory bus poisoned".to_string()))
    }

    /// While set, every publish fails.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Latency added to every `publish` call.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.publish_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Routing keys and payloads of every successful publish.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Payloads published under `routing_key`, decoded as JSON.
    pub fn published_json(&self, routing_key: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|(key, _)| key == routing_key)
            .filter_map(|(_, payload)| serde_json::from_slice(&payload).ok())
            .collect()
    }

    /// Messages waiting in `queue`, claimed or not.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state()
            .map(|state| state.messages.values().filter(|m| m.queue == queue).count())
            .unwrap_or(0)
    }

    /// Publish with an explicit publication time.
    pub fn publish_at(
        &self,
        routing_key: &str,
        payload: Bytes,
        published_at: DateTime<Utc>,
    ) -> BusResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::PublishFailed("injected publish failure".to_string()));
        }

        let mut state = self.state()?;
        let mut queues: Vec<String> = state
            .bindings
            .iter()
            .filter(|(_, pattern)| topic_matches(pattern, routing_key))
            .map(|(queue, _)| queue.clone())
            .collect();
        queues.sort();
        queues.dedup();

        let now = Instant::now();
        for queue in queues {
            state.next_id += 1;
            let id = state.next_id;
            state.messages.insert(
                id,
                StoredMessage {
                    queue,
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    published_at,
                    available_at: now,
                    locked_until: None,
                    delivery_count: 0,
                },
            );
        }
        state.published.push((routing_key.to_string(), payload));
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, routing_key: &str, payload: Bytes) -> BusResult<()> {
        let delay_ms = self.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        self.publish_at(routing_key, payload, Utc::now())
    }
}

#[async_trait]
impl EventSource for MemoryEventBus {
    async fn declare_queue(&self, queue: &str, bindings: &[&str]) -> BusResult<()> {
        if let Some(bad) = bindings.iter().find(|p| !validate_pattern(p)) {
            return Err(BusError::InvalidPattern(bad.to_string()));
        }

        let mut state = self.state()?;
        for pattern in bindings {
            let binding = (queue.to_string(), pattern.to_string());
            if !state.bindings.contains(&binding) {
                state.bindings.push(binding);
            }
        }
        Ok(())
    }

    async fn claim(&self, queue: &str) -> BusResult<Option<Delivery>> {
        let now = Instant::now();
        let mut state = self.state()?;
        let next = state.messages.iter_mut().find(|(_, m)| {
            m.queue == queue
                && m.available_at <= now
                && m.locked_until.map_or(true, |until| until < now)
        });

        Ok(next.map(|(id, message)| {
            message.locked_until = Some(now + self.visibility_timeout);
            message.delivery_count += 1;
            Delivery {
                id: *id,
                queue: message.queue.clone(),
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
                published_at: message.published_at,
                delivery_count: message.delivery_count,
            }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> BusResult<()> {
        self.state()?.messages.remove(&delivery.id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BusResult<()> {
        let mut state = self.state()?;
        if !requeue {
            state.messages.remove(&delivery.id);
            return Ok(());
        }

        if let Some(message) = state.messages.get_mut(&delivery.id) {
            message.locked_until = None;
            message.available_at = Instant::now() + self.requeue_delay;
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn release_expired(&self, queue: &str) -> BusResult<u64> {
        let now = Instant::now();
        let mut released = 0;
        for message in self.state()?.messages.values_mut() {
            if message.queue == queue && message.locked_until.is_some_and(|until| until < now) {
                message.locked_until = None;
                released += 1;
            }
        }
        Ok(released)
    }

    fn wakeups(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

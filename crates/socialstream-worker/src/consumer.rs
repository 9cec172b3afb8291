//! Event consumer: worker pool, LISTEN/NOTIFY or polling, ack/requeue/drop.
//!
//! Shutdown: [`EventConsumer::shutdown`] signals the pool to stop claiming; it
//! does not wait for in-flight deliveries. A delivery abandoned mid-handler is
//! redelivered once its visibility timeout lapses.

use socialstream_bus::{Delivery, EventSource, BUS_NOTIFY_CHANNEL};
use socialstream_core::{ConsumerSettings, HandlerError};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;

use crate::handler::EventHandler;

/// How a handled delivery is settled with the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    Requeue,
    Drop,
}

/// Settlement policy.
///
/// Success is acked. Unrecoverable failures are dropped on first sight.
/// Recoverable failures are requeued until the message is older than
/// `poison_age`, after which they are dropped.
pub fn decide_outcome(
    result: &Result<(), HandlerError>,
    age: Duration,
    poison_age: Duration,
) -> DeliveryOutcome {
    match result {
        Ok(()) => DeliveryOutcome::Ack,
        Err(e) if !e.is_recoverable() => DeliveryOutcome::Drop,
        Err(_) if age > poison_age => DeliveryOutcome::Drop,
        Err(_) => DeliveryOutcome::Requeue,
    }
}

#[derive(Clone, Debug)]
pub struct EventConsumerConfig {
    pub queue: String,
    pub max_workers: usize,
    pub poll_interval: Duration,
    /// Upper bound on a single handler call. Kept below the bus visibility
    /// timeout so a slow handler is settled before the message reappears.
    pub handler_timeout: Duration,
    pub poison_message_age: Duration,
    /// Interval between sweeps that release lapsed claims. Zero disables.
    pub reap_interval: Duration,
}

impl EventConsumerConfig {
    pub fn from_settings(queue: impl Into<String>, settings: &ConsumerSettings) -> Self {
        Self {
            queue: queue.into(),
            max_workers: settings.max_workers,
            poll_interval: settings.poll_interval,
            handler_timeout: settings.visibility_timeout.mul_f64(0.8),
            poison_message_age: settings.poison_message_age,
            reap_interval: settings.visibility_timeout,
        }
    }
}

#[derive(Clone)]
pub struct EventConsumer {
    config: EventConsumerConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl EventConsumer {
    /// Start consuming `config.queue`, dispatching to `handler`.
    ///
    /// If `pool` is `Some`, the pool also LISTENs on the bus notification
    /// channel to wake immediately on publish, in addition to polling at
    /// `poll_interval`. Backends that expose an in-process wake-up signal are
    /// listened to as well.
    pub fn new(
        source: Arc<dyn EventSource>,
        config: EventConsumerConfig,
        handler: Weak<dyn EventHandler>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let config_clone = config.clone();
        tokio::spawn(async move {
            Self::worker_pool(source, config_clone, handler, shutdown_rx, pool).await;
        });

        Self {
            config,
            shutdown_tx,
        }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    async fn worker_pool(
        source: Arc<dyn EventSource>,
        config: EventConsumerConfig,
        handler: Weak<dyn EventHandler>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let wakeups = source.wakeups();
        tracing::info!(
            queue = %config.queue,
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            listen_notify = pool.is_some(),
            in_process_wakeups = wakeups.is_some(),
            "Event consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        // LISTEN runs on its own task so the main loop never blocks on recv
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        let listener_handle = pool.map(|pool| {
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(BUS_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = notify_tx.try_send(());
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            })
        });

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if !config.reap_interval.is_zero() {
            let reaper_source = source.clone();
            let queue = config.queue.clone();
            let reap_interval = config.reap_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match reaper_source.release_expired(&queue).await {
                                Ok(0) => {}
                                Ok(released) => tracing::info!(queue = %queue, released, "Released lapsed claims"),
                                Err(e) => tracing::error!(queue = %queue, error = %e, "Claim reaper failed"),
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(queue = %config.queue, "Event consumer shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                Some(()) = notify_rx.recv() => {
                    Self::claim_available(&source, &config, &semaphore, &handler).await;
                }
                _ = wait_for_wakeup(wakeups.as_deref()) => {
                    Self::claim_available(&source, &config, &semaphore, &handler).await;
                }
                _ = sleep(config.poll_interval) => {
                    Self::claim_available(&source, &config, &semaphore, &handler).await;
                }
            }
        }

        if let Some(handle) = listener_handle {
            handle.abort();
        }
        tracing::info!(queue = %config.queue, "Event consumer stopped");
    }

    /// Claim and dispatch until the queue is empty or every worker is busy.
    async fn claim_available(
        source: &Arc<dyn EventSource>,
        config: &EventConsumerConfig,
        semaphore: &Arc<Semaphore>,
        handler: &Weak<dyn EventHandler>,
    ) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("No workers available, skipping claim");
                    return;
                }
            };

            match source.claim(&config.queue).await {
                Ok(Some(delivery)) => {
                    let source = source.clone();
                    let handler = handler.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::process_delivery(delivery, source, handler, &config).await;
                    });
                }
                Ok(None) => {
                    tracing::trace!(queue = %config.queue, "No messages available");
                    return;
                }
                Err(e) => {
                    tracing::error!(queue = %config.queue, error = %e, "Failed to claim message");
                    return;
                }
            }
        }
    }

    #[tracing::instrument(
        skip(delivery, source, handler, config),
        fields(
            message.id = delivery.id,
            routing_key = %delivery.routing_key,
            delivery_count = delivery.delivery_count
        )
    )]
    async fn process_delivery(
        delivery: Delivery,
        source: Arc<dyn EventSource>,
        handler: Weak<dyn EventHandler>,
        config: &EventConsumerConfig,
    ) {
        let result = match handler.upgrade() {
            Some(handler) => {
                match tokio::time::timeout(config.handler_timeout, handler.handle(&delivery)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::recoverable(anyhow::anyhow!(
                        "handler did not finish within {}ms",
                        config.handler_timeout.as_millis()
                    ))),
                }
            }
            None => Err(HandlerError::recoverable(anyhow::anyhow!(
                "event handler was dropped, cannot process message"
            ))),
        };

        let age = delivery.age();
        let outcome = decide_outcome(&result, age, config.poison_message_age);

        let settled = match outcome {
            DeliveryOutcome::Ack => {
                tracing::debug!("Message handled");
                source.ack(&delivery).await
            }
            DeliveryOutcome::Requeue => {
                if let Err(e) = &result {
                    tracing::warn!(
                        error = %e,
                        age_ms = age.as_millis() as u64,
                        "Handler failed, requeueing message"
                    );
                }
                source.nack(&delivery, true).await
            }
            DeliveryOutcome::Drop => {
                if let Err(e) = &result {
                    tracing::error!(
                        error = %e,
                        recoverable = e.is_recoverable(),
                        age_ms = age.as_millis() as u64,
                        "Handler failed, dropping message"
                    );
                }
                source.nack(&delivery, false).await
            }
        };

        if let Err(e) = settled {
            // The claim lapses and the message comes back.
            tracing::error!(error = %e, outcome = ?outcome, "Failed to settle message");
        }
    }

    /// Signals the worker pool to stop claiming and exit its loop.
    ///
    /// Returns immediately; handlers already running keep going until they
    /// complete or hit the handler timeout.
    pub async fn shutdown(&self) {
        tracing::info!(queue = %self.config.queue, "Initiating event consumer shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn wait_for_wakeup(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

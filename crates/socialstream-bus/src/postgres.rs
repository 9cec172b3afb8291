use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres};
use std::time::Duration;

use crate::error::{BusError, BusResult};
use crate::topic::{topic_matches, validate_pattern};
use crate::traits::{Delivery, EventPublisher, EventSource};

/// Channel notified after every publish so idle consumers wake immediately.
pub const BUS_NOTIFY_CHANNEL: &str = "socialstream_bus";

#[derive(FromRow)]
struct DeliveryRow {
    id: i64,
    queue: String,
    routing_key: String,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
    delivery_count: i32,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            queue: row.queue,
            routing_key: row.routing_key,
            payload: Bytes::from(row.payload),
            published_at: row.published_at,
            delivery_count: row.delivery_count,
        }
    }
}

/// Topic exchange stored in Postgres.
#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
    visibility_timeout: Duration,
    requeue_delay: Duration,
}

impl PgEventBus {
    pub fn new(pool: PgPool, visibility_timeout: Duration, requeue_delay: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            requeue_delay,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventPublisher for PgEventBus {
    #[tracing::instrument(skip(self, payload), fields(db.table = "bus_messages", db.operation = "insert"))]
    async fn publish(&self, routing_key: &str, payload: Bytes) -> BusResult<()> {
        let mut tx = self.pool.begin().await?;

        let bindings: Vec<(String, String)> =
            sqlx::query_as("SELECT queue, pattern FROM bus_bindings")
                .fetch_all(&mut *tx)
                .await?;

        let mut queues: Vec<String> = bindings
            .into_iter()
            .filter(|(_, pattern)| topic_matches(pattern, routing_key))
            .map(|(queue, _)| queue)
            .collect();
        queues.sort();
        queues.dedup();

        if queues.is_empty() {
            tracing::debug!(routing_key = %routing_key, "No binding matches routing key, message discarded");
            tx.commit().await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO bus_messages (queue, routing_key, payload)
            SELECT q, $2, $3 FROM UNNEST($1::text[]) AS t(q)
            "#,
        )
        .bind(&queues)
        .bind(routing_key)
        .bind(payload.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(|e| BusError::PublishFailed(e.to_string()))?;

        // Consumers fall back to polling if the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(BUS_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                routing_key = %routing_key,
                "Failed to send pg_notify for published message, consumers will poll"
            );
        }

        tx.commit()
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))?;

        tracing::debug!(
            routing_key = %routing_key,
            queues = ?queues,
            "Message published"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSource for PgEventBus {
    #[tracing::instrument(skip(self), fields(db.table = "bus_bindings", db.operation = "insert"))]
    async fn declare_queue(&self, queue: &str, bindings: &[&str]) -> BusResult<()> {
        if let Some(bad) = bindings.iter().find(|p| !validate_pattern(p)) {
            return Err(BusError::InvalidPattern(bad.to_string()));
        }

        let patterns: Vec<String> = bindings.iter().map(|p| p.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO bus_bindings (queue, pattern)
            SELECT $1, p FROM UNNEST($2::text[]) AS t(p)
            ON CONFLICT (queue, pattern) DO NOTHING
            "#,
        )
        .bind(queue)
        .bind(&patterns)
        .execute(&self.pool)
        .await?;

        tracing::info!(queue = %queue, bindings = ?bindings, "Queue declared");
        Ok(())
    }

    async fn claim(&self, queue: &str) -> BusResult<Option<Delivery>> {
        let row = sqlx::query_as::<Postgres, DeliveryRow>(
            r#"
            UPDATE bus_messages
            SET locked_until = NOW() + make_interval(secs => $2),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM bus_messages
                WHERE queue = $1
                    AND available_at <= NOW()
                    AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, routing_key, payload, published_at, delivery_count
            "#,
        )
        .bind(queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BusError::ConsumeFailed(e.to_string()))?;

        Ok(row.map(Delivery::from))
    }

    async fn ack(&self, delivery: &Delivery) -> BusResult<()> {
        let result = sqlx::query("DELETE FROM bus_messages WHERE id = $1")
            .bind(delivery.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Visibility timeout lapsed and another consumer already finished it.
            tracing::warn!(message_id = delivery.id, "Acked message was already gone");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BusResult<()> {
        if !requeue {
            sqlx::query("DELETE FROM bus_messages WHERE id = $1")
                .bind(delivery.id)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE bus_messages
            SET locked_until = NULL,
                available_at = NOW() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(self.requeue_delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release_expired(&self, queue: &str) -> BusResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bus_messages
            SET locked_until = NULL
            WHERE queue = $1 AND locked_until < NOW()
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

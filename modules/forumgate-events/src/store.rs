//! PgEventBus: durable topics backed by Postgres.
//!
//! Every published message is fanned out into one delivery row per
//! subscription on its topic. Workers claim rows with `FOR UPDATE SKIP LOCKED`
//! and hold a lease; a crashed worker's deliveries come back when the lease
//! runs out.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::bus::{Delivery, DeliverySource, EventBus, Subscription};

/// How long a claimed delivery stays invisible to other workers.
const LEASE_SECS: f64 = 300.0;

/// Upper bound of the redelivery backoff.
const MAX_BACKOFF_SECS: f64 = 300.0;

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    seq: i64,
    topic: String,
    payload: serde_json::Value,
    attempts: i32,
    published_at: DateTime<Utc>,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Self {
            seq: row.seq,
            topic: row.topic,
            payload: row.payload,
            attempt: row.attempts.max(0) as u32,
            published_at: row.published_at,
        }
    }
}

#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
}

impl PgEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Exponential backoff in seconds after a failed `attempt`.
fn backoff_secs(attempt: u32) -> f64 {
    2f64.powi(attempt.min(16) as i32).min(MAX_BACKOFF_SECS)
}

#[async_trait]
impl EventBus for PgEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<i64> {
        let (seq,) = sqlx::query_as::<_, (i64,)>(
            r#"
            WITH msg AS (
                INSERT INTO bus_messages (topic, payload)
                VALUES ($1, $2)
                RETURNING seq
            ), fanout AS (
                INSERT INTO bus_deliveries (subscription, seq)
                SELECT s.name, msg.seq
                FROM bus_subscriptions s, msg
                WHERE s.topic = $1
            )
            SELECT seq FROM msg
            "#,
        )
        .bind(topic)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        notify_published(&self.pool, topic, seq).await;
        debug!(topic, seq, "Published");
        Ok(seq)
    }
}

#[async_trait]
impl DeliverySource for PgEventBus {
    async fn subscribe(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bus_subscriptions (name, topic)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&subscription.name)
        .bind(&subscription.topic)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn poll(&self, subscription: &Subscription, limit: i64) -> Result<Vec<Delivery>> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            WITH due AS (
                SELECT subscription, seq
                FROM bus_deliveries
                WHERE subscription = $1
                  AND status = 'pending'
                  AND available_at <= now()
                ORDER BY seq ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE bus_deliveries d
            SET attempts = d.attempts + 1,
                available_at = now() + make_interval(secs => $3),
                updated_at = now()
            FROM due, bus_messages m
            WHERE d.subscription = due.subscription
              AND d.seq = due.seq
              AND m.seq = d.seq
            RETURNING d.seq, m.topic, m.payload, d.attempts, m.published_at
            "#,
        )
        .bind(&subscription.name)
        .bind(limit)
        .bind(LEASE_SECS)
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries: Vec<Delivery> = rows.into_iter().map(Delivery::from).collect();
        deliveries.sort_by_key(|d| d.seq);
        Ok(deliveries)
    }

    async fn ack(&self, subscription: &Subscription, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bus_deliveries
            SET status = 'done', updated_at = now()
            WHERE subscription = $1 AND seq = $2
            "#,
        )
        .bind(&subscription.name)
        .bind(delivery.seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bus_deliveries
            SET available_at = now() + make_interval(secs => $3),
                last_error = $4,
                updated_at = now()
            WHERE subscription = $1 AND seq = $2
            "#,
        )
        .bind(&subscription.name)
        .bind(delivery.seq)
        .bind(backoff_secs(delivery.attempt))
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bus_deliveries
            SET status = 'dead_letter', last_error = $3, updated_at = now()
            WHERE subscription = $1 AND seq = $2
            "#,
        )
        .bind(&subscription.name)
        .bind(delivery.seq)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Best-effort NOTIFY so listeners can wake early. Polling still delivers.
async fn notify_published(pool: &PgPool, topic: &str, seq: i64) {
    let result = sqlx::query("SELECT pg_notify('bus_messages', $1)")
        .bind(format!("{topic}:{seq}"))
        .execute(pool)
        .await;

    if let Err(e) = result {
        warn!(error = %e, topic, seq, "PG NOTIFY failed (non-fatal)");
    }
}

// ---------------------------------------------------------------------------
// Test utilities
// ---------------------------------------------------------------------------

#[cfg(feature = "test-utils")]
impl PgEventBus {
    /// Status and attempt count of one delivery.
    pub async fn delivery_status(
        &self,
        subscription: &str,
        seq: i64,
    ) -> Result<Option<(String, i32)>> {
        let row = sqlx::query_as::<_, (String, i32)>(
            "SELECT status, attempts FROM bus_deliveries WHERE subscription = $1 AND seq = $2",
        )
        .bind(subscription)
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Make every pending delivery of `subscription` due now.
    pub async fn expire_backoff(&self, subscription: &str) -> Result<()> {
        sqlx::query(
            "UPDATE bus_deliveries SET available_at = now() WHERE subscription = $1 AND status = 'pending'",
        )
        .bind(subscription)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(1), 2.0);
        assert_eq!(backoff_secs(3), 8.0);
        assert_eq!(backoff_secs(9), MAX_BACKOFF_SECS);
        assert_eq!(backoff_secs(u32::MAX), MAX_BACKOFF_SECS);
    }
}

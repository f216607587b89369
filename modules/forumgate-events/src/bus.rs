//! Core bus types and the two seams: publishing and consuming.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// One delivery of a published message to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub seq: i64,
    pub topic: String,
    pub payload: serde_json::Value,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
}

impl Delivery {
    /// Decode the payload into the topic's event type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).with_context(|| {
            format!(
                "Malformed payload on topic {} (seq {})",
                self.topic, self.seq
            )
        })
    }
}

/// A named consumer of one topic with its own retry budget.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct Subscription {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub topic: String,
    /// Redeliveries after the first attempt before dead-lettering.
    #[builder(default = 5)]
    pub max_retries: u32,
}

impl Subscription {
    /// Whether a delivery that failed on `attempt` has used up its retries.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

/// Where a settled delivery ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    DeadLettered,
}

/// Publishing side. At-least-once: a successful return means the message is
/// durable and will be delivered to every subscription on the topic.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append a message to `topic`, returning its sequence number.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<i64>;
}

/// Serialize `event` and publish it.
pub async fn publish_json<T: Serialize + Sync>(
    bus: &dyn EventBus,
    topic: &str,
    event: &T,
) -> Result<i64> {
    let payload = serde_json::to_value(event)
        .with_context(|| format!("Failed to serialize event for topic {topic}"))?;
    bus.publish(topic, payload).await
}

/// Consuming side, driven by the dispatch loop.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Register a subscription. Messages published after this call are
    /// delivered to it. Idempotent.
    async fn subscribe(&self, subscription: &Subscription) -> Result<()>;

    /// Claim up to `limit` deliveries that are due. Each claim increments the
    /// delivery's attempt counter.
    async fn poll(&self, subscription: &Subscription, limit: i64) -> Result<Vec<Delivery>>;

    async fn ack(&self, subscription: &Subscription, delivery: &Delivery) -> Result<()>;

    /// Schedule a redelivery.
    async fn requeue(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        error: &str,
    ) -> Result<()>;

    /// Park the delivery for out-of-band handling. It is never redelivered.
    async fn dead_letter(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        error: &str,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscription_defaults_to_five_retries() {
        let sub = Subscription::builder()
            .name("forum-post-classifier")
            .topic("admitted-forum-posts")
            .build();
        assert_eq!(sub.max_retries, 5);
        assert!(!sub.exhausted(5));
        assert!(sub.exhausted(6));
    }

    #[test]
    fn decode_reports_topic_on_malformed_payload() {
        let delivery = Delivery {
            seq: 7,
            topic: "raw-messages".into(),
            payload: json!({"unexpected": true}),
            attempt: 1,
            published_at: Utc::now(),
        };

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Expected {
            id: String,
        }

        let err = delivery.decode::<Expected>().unwrap_err();
        assert!(err.to_string().contains("raw-messages"));
    }
}

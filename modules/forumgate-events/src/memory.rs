//! In-process bus for tests and single-binary runs without Postgres.
//!
//! Requeued deliveries are due immediately; there is no backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::bus::{Delivery, DeliverySource, EventBus, Subscription};

#[derive(Default)]
struct Inner {
    next_seq: i64,
    published: Vec<Delivery>,
    /// Subscription name -> topic.
    subscriptions: HashMap<String, String>,
    pending: HashMap<String, VecDeque<Delivery>>,
    acked: HashMap<String, Vec<i64>>,
    dead: HashMap<String, Vec<(Delivery, String)>>,
    failing_topics: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryEventBus {
    inner: Mutex<Inner>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later publish to `topic` fail.
    pub fn fail_publishes_to(&self, topic: &str) {
        self.state().failing_topics.insert(topic.to_string());
    }

    pub fn restore_publishes_to(&self, topic: &str) {
        self.state().failing_topics.remove(topic);
    }

    /// Payloads published to `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<serde_json::Value> {
        self.state()
            .published
            .iter()
            .filter(|d| d.topic == topic)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn total_published(&self) -> usize {
        self.state().published.len()
    }

    /// Sequence numbers acked by `subscription`.
    pub fn acked(&self, subscription: &str) -> Vec<i64> {
        self.state()
            .acked
            .get(subscription)
            .cloned()
            .unwrap_or_default()
    }

    /// Dead-lettered deliveries of `subscription` with their last error.
    pub fn dead_letters(&self, subscription: &str) -> Vec<(Delivery, String)> {
        self.state()
            .dead
            .get(subscription)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pending(&self, subscription: &str) -> usize {
        self.state()
            .pending
            .get(subscription)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<i64> {
        let mut state = self.state();
        if state.failing_topics.contains(topic) {
            bail!("publish to {topic} rejected");
        }

        state.next_seq += 1;
        let delivery = Delivery {
            seq: state.next_seq,
            topic: topic.to_string(),
            payload,
            attempt: 0,
            published_at: Utc::now(),
        };

        let Inner {
            subscriptions,
            pending,
            ..
        } = &mut *state;
        for (name, sub_topic) in subscriptions.iter() {
            if sub_topic == topic {
                pending
                    .entry(name.clone())
                    .or_default()
                    .push_back(delivery.clone());
            }
        }
        state.published.push(delivery);
        Ok(state.next_seq)
    }
}

#[async_trait]
impl DeliverySource for MemoryEventBus {
    async fn subscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state();
        state
            .subscriptions
            .entry(subscription.name.clone())
            .or_insert_with(|| subscription.topic.clone());
        state.pending.entry(subscription.name.clone()).or_default();
        Ok(())
    }

    async fn poll(&self, subscription: &Subscription, limit: i64) -> Result<Vec<Delivery>> {
        let mut state = self.state();
        let Some(queue) = state.pending.get_mut(&subscription.name) else {
            bail!("unknown subscription {}", subscription.name);
        };
        let take = queue.len().min(limit.max(0) as usize);
        Ok(queue
            .drain(..take)
            .map(|mut d| {
                d.attempt += 1;
                d
            })
            .collect())
    }

    async fn ack(&self, subscription: &Subscription, delivery: &Delivery) -> Result<()> {
        self.state()
            .acked
            .entry(subscription.name.clone())
            .or_default()
            .push(delivery.seq);
        Ok(())
    }

    async fn requeue(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        _error: &str,
    ) -> Result<()> {
        self.state()
            .pending
            .entry(subscription.name.clone())
            .or_default()
            .push_back(delivery.clone());
        Ok(())
    }

    async fn dead_letter(
        &self,
        subscription: &Subscription,
        delivery: &Delivery,
        error: &str,
    ) -> Result<()> {
        self.state()
            .dead
            .entry(subscription.name.clone())
            .or_default()
            .push((delivery.clone(), error.to_string()));
        Ok(())
    }
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<i64> {
        (**self).publish(topic, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{run_until_idle, subscribe_all, Ack, DeliveryHandler};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Always(fn() -> Ack, AtomicU32);

    #[async_trait]
    impl DeliveryHandler for Always {
        async fn handle(&self, _delivery: &Delivery) -> Ack {
            self.1.fetch_add(1, Ordering::SeqCst);
            (self.0)()
        }
    }

    fn sub() -> Subscription {
        Subscription::builder()
            .name("worker")
            .topic("jobs")
            .max_retries(5)
            .build()
    }

    #[tokio::test]
    async fn messages_before_subscribe_are_not_delivered() {
        let bus = MemoryEventBus::new();
        bus.publish("jobs", json!({"n": 1})).await.unwrap();
        bus.subscribe(&sub()).await.unwrap();
        assert_eq!(bus.pending("worker"), 0);

        bus.publish("jobs", json!({"n": 2})).await.unwrap();
        bus.publish("other", json!({"n": 3})).await.unwrap();
        assert_eq!(bus.pending("worker"), 1);
    }

    #[tokio::test]
    async fn retry_exhausts_after_one_plus_max_retries_attempts() {
        let bus = MemoryEventBus::new();
        let sub = sub();
        bus.subscribe(&sub).await.unwrap();
        bus.publish("jobs", json!({})).await.unwrap();

        let handler = Always(|| Ack::Retry(anyhow::anyhow!("flaky")), AtomicU32::new(0));
        run_until_idle(&bus, &sub, &handler).await.unwrap();

        assert_eq!(handler.1.load(Ordering::SeqCst), 6);
        let dead = bus.dead_letters("worker");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempt, 6);
        assert!(dead[0].1.contains("flaky"));
    }

    #[tokio::test]
    async fn reject_dead_letters_on_first_attempt() {
        let bus = MemoryEventBus::new();
        let sub = sub();
        bus.subscribe(&sub).await.unwrap();
        bus.publish("jobs", json!({})).await.unwrap();

        let handler = Always(|| Ack::Reject(anyhow::anyhow!("bad index")), AtomicU32::new(0));
        run_until_idle(&bus, &sub, &handler).await.unwrap();

        assert_eq!(handler.1.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dead_letters("worker").len(), 1);
    }

    #[tokio::test]
    async fn done_acks_once() {
        let bus = MemoryEventBus::new();
        let sub = sub();
        bus.subscribe(&sub).await.unwrap();
        let seq = bus.publish("jobs", json!({})).await.unwrap();

        let handler = Always(|| Ack::Done, AtomicU32::new(0));
        run_until_idle(&bus, &sub, &handler).await.unwrap();

        assert_eq!(bus.acked("worker"), vec![seq]);
        assert!(bus.dead_letters("worker").is_empty());
    }

    #[tokio::test]
    async fn subscribe_all_registers_before_first_publish() {
        let bus = MemoryEventBus::new();
        let subs = vec![
            sub(),
            Subscription::builder().name("auditor").topic("jobs").build(),
        ];
        assert_eq!(subscribe_all(&bus, &subs).await.unwrap(), 2);
        // Registering again is a no-op.
        subscribe_all(&bus, &subs).await.unwrap();

        bus.publish("jobs", json!({})).await.unwrap();
        assert_eq!(bus.pending("worker"), 1);
        assert_eq!(bus.pending("auditor"), 1);
    }

    #[tokio::test]
    async fn failing_topic_rejects_publish() {
        let bus = MemoryEventBus::new();
        bus.fail_publishes_to("jobs");
        assert!(bus.publish("jobs", json!({})).await.is_err());
        bus.restore_publishes_to("jobs");
        assert!(bus.publish("jobs", json!({})).await.is_ok());
        assert_eq!(bus.total_published(), 1);
    }
}

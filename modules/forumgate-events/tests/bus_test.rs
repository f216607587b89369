//! Integration tests for PgEventBus.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use forumgate_events::{
    run_until_idle, Ack, Delivery, DeliveryHandler, DeliverySource, EventBus, PgEventBus,
    Subscription,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU32, Ordering};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::raw_sql(include_str!("../../../migrations/20260901000001_bus.sql"))
        .execute(&pool)
        .await
        .ok()?;

    sqlx::query("TRUNCATE bus_deliveries, bus_subscriptions, bus_messages RESTART IDENTITY")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

fn subscription(name: &str, topic: &str) -> Subscription {
    Subscription::builder().name(name).topic(topic).build()
}

struct CountingHandler {
    calls: AtomicU32,
    verdict: fn() -> Ack,
}

impl CountingHandler {
    fn new(verdict: fn() -> Ack) -> Self {
        Self {
            calls: AtomicU32::new(0),
            verdict,
        }
    }
}

#[async_trait::async_trait]
impl DeliveryHandler for CountingHandler {
    async fn handle(&self, _delivery: &Delivery) -> Ack {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.verdict)()
    }
}

#[tokio::test]
async fn publish_fans_out_to_every_subscription_on_the_topic() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let bus = PgEventBus::new(pool);
    let classifier = subscription("classifier", "admitted-forum-posts");
    let tagger = subscription("tagger", "admitted-forum-posts");
    let alerts = subscription("alerts", "admitted-community-messages");
    for sub in [&classifier, &tagger, &alerts] {
        bus.subscribe(sub).await.unwrap();
    }

    let seq = bus
        .publish("admitted-forum-posts", json!({"id": "t1"}))
        .await
        .unwrap();

    let a = bus.poll(&classifier, 10).await.unwrap();
    let b = bus.poll(&tagger, 10).await.unwrap();
    let c = bus.poll(&alerts, 10).await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert!(c.is_empty());
    assert_eq!(a[0].seq, seq);
    assert_eq!(a[0].attempt, 1);
    assert_eq!(a[0].payload["id"], "t1");
}

#[tokio::test]
async fn claimed_delivery_is_invisible_to_other_pollers() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let bus = PgEventBus::new(pool);
    let sub = subscription("classifier", "admitted-forum-posts");
    bus.subscribe(&sub).await.unwrap();
    bus.publish("admitted-forum-posts", json!({})).await.unwrap();

    assert_eq!(bus.poll(&sub, 10).await.unwrap().len(), 1);
    assert!(bus.poll(&sub, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn ack_marks_delivery_done() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let bus = PgEventBus::new(pool);
    let sub = subscription("classifier", "admitted-forum-posts");
    bus.subscribe(&sub).await.unwrap();
    let seq = bus.publish("admitted-forum-posts", json!({})).await.unwrap();

    let handler = CountingHandler::new(|| Ack::Done);
    run_until_idle(&bus, &sub, &handler).await.unwrap();

    let (status, attempts) = bus
        .delivery_status("classifier", seq)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, "done");
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn retries_dead_letter_after_budget_is_spent() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let bus = PgEventBus::new(pool);
    let sub = Subscription::builder()
        .name("classifier")
        .topic("admitted-forum-posts")
        .max_retries(2)
        .build();
    bus.subscribe(&sub).await.unwrap();
    let seq = bus.publish("admitted-forum-posts", json!({})).await.unwrap();

    let handler = CountingHandler::new(|| Ack::Retry(anyhow::anyhow!("vector index down")));
    for _ in 0..3 {
        run_until_idle(&bus, &sub, &handler).await.unwrap();
        bus.expire_backoff("classifier").await.unwrap();
    }

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    let (status, attempts) = bus
        .delivery_status("classifier", seq)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, "dead_letter");
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn reject_dead_letters_immediately() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let bus = PgEventBus::new(pool);
    let sub = subscription("alerts", "admitted-community-messages");
    bus.subscribe(&sub).await.unwrap();
    let seq = bus
        .publish("admitted-community-messages", json!({}))
        .await
        .unwrap();

    let handler = CountingHandler::new(|| Ack::Reject(anyhow::anyhow!("topic index 9 of 2")));
    run_until_idle(&bus, &sub, &handler).await.unwrap();

    let (status, _) = bus.delivery_status("alerts", seq).await.unwrap().unwrap();
    assert_eq!(status, "dead_letter");
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

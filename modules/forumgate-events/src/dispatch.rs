//! Dispatch loop: poll a subscription, run the handler, settle each delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, DeliverySource, Settlement, Subscription};

/// Handler verdict for one delivery.
#[derive(Debug)]
pub enum Ack {
    /// Processed (or deliberately skipped). Never redelivered.
    Done,
    /// Failed; redeliver until the subscription's retries run out.
    Retry(anyhow::Error),
    /// Failed in a way redelivery cannot fix. Dead-lettered at once.
    Reject(anyhow::Error),
}

#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Ack;
}

#[async_trait]
impl<T: DeliveryHandler + ?Sized> DeliveryHandler for Arc<T> {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        (**self).handle(delivery).await
    }
}

/// Apply a handler verdict to the source.
pub async fn settle(
    source: &dyn DeliverySource,
    subscription: &Subscription,
    delivery: &Delivery,
    ack: Ack,
) -> Result<Settlement> {
    match ack {
        Ack::Done => {
            source.ack(subscription, delivery).await?;
            Ok(Settlement::Acked)
        }
        Ack::Retry(err) if !subscription.exhausted(delivery.attempt) => {
            warn!(
                subscription = %subscription.name,
                seq = delivery.seq,
                attempt = delivery.attempt,
                error = %err,
                "Delivery failed, will retry"
            );
            source
                .requeue(subscription, delivery, &format!("{err:#}"))
                .await?;
            Ok(Settlement::Requeued)
        }
        Ack::Retry(err) | Ack::Reject(err) => {
            error!(
                subscription = %subscription.name,
                seq = delivery.seq,
                attempt = delivery.attempt,
                error = %err,
                "Delivery dead-lettered"
            );
            source
                .dead_letter(subscription, delivery, &format!("{err:#}"))
                .await?;
            Ok(Settlement::DeadLettered)
        }
    }
}

/// Handle one polled batch with at most `concurrency` deliveries in flight.
/// Returns the number of deliveries claimed.
async fn drain_batch(
    source: &dyn DeliverySource,
    subscription: &Subscription,
    handler: &dyn DeliveryHandler,
    concurrency: usize,
    batch_size: i64,
) -> Result<usize> {
    let batch = source.poll(subscription, batch_size).await?;
    let claimed = batch.len();

    stream::iter(batch)
        .for_each_concurrent(concurrency.max(1), |delivery| async move {
            let ack = handler.handle(&delivery).await;
            if let Err(e) = settle(source, subscription, &delivery, ack).await {
                // The lease expires and the delivery comes back.
                warn!(
                    subscription = %subscription.name,
                    seq = delivery.seq,
                    error = %e,
                    "Failed to settle delivery"
                );
            }
        })
        .await;

    Ok(claimed)
}

/// Register every subscription before anything publishes. Messages published
/// to a topic before a subscription exists are never delivered to it.
pub async fn subscribe_all<'a>(
    source: &dyn DeliverySource,
    subscriptions: impl IntoIterator<Item = &'a Subscription>,
) -> Result<usize> {
    let mut registered = 0;
    for subscription in subscriptions {
        source.subscribe(subscription).await?;
        registered += 1;
    }
    info!(subscriptions = registered, "Subscriptions registered");
    Ok(registered)
}

/// Run a subscription until `shutdown` flips to true.
pub async fn run_subscription(
    source: Arc<dyn DeliverySource>,
    subscription: Subscription,
    handler: Arc<dyn DeliveryHandler>,
    concurrency: usize,
    batch_size: i64,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    source.subscribe(&subscription).await?;
    info!(
        subscription = %subscription.name,
        topic = %subscription.topic,
        concurrency,
        "Subscription worker started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match drain_batch(
            source.as_ref(),
            &subscription,
            handler.as_ref(),
            concurrency,
            batch_size,
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(subscription = %subscription.name, error = %e, "Poll failed");
                0
            }
        };

        if claimed == 0 {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    info!(subscription = %subscription.name, "Subscription worker stopped");
    Ok(())
}

/// Drain a subscription until nothing is due. For tests and one-shot tools.
///
/// Redeliveries that are scheduled in the future are not waited for.
pub async fn run_until_idle(
    source: &dyn DeliverySource,
    subscription: &Subscription,
    handler: &dyn DeliveryHandler,
) -> Result<usize> {
    source.subscribe(subscription).await?;
    let mut total = 0;
    loop {
        let claimed = drain_batch(source, subscription, handler, 1, 64).await?;
        if claimed == 0 {
            break;
        }
        total += claimed;
    }
    debug!(subscription = %subscription.name, total, "Subscription idle");
    Ok(total)
}

//! Bus subscription handlers. Each decodes its topic's payload, runs one
//! stage and maps the result onto an `Ack`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use forumgate_common::{DuplicatePostEvent, PipelineResult, RawMessage};
use forumgate_events::{Ack, Delivery, DeliveryHandler};

use crate::alerts::ConversationAlerts;
use crate::classifier::SimilarityClassifier;
use crate::gate::{Admission, IdempotentIngestionGate};
use crate::notifier::DuplicateNotifier;
use crate::outcome::Outcome;
use crate::tagger::ForumPostTagger;

/// Retryable failures are redelivered; invariant violations dead-letter now.
pub fn ack_for(stage: &str, seq: i64, result: PipelineResult<()>) -> Ack {
    match result {
        Ok(()) => Ack::Done,
        Err(e) if e.is_retryable() => Ack::Retry(e.into()),
        Err(e) => {
            error!(stage, seq, error = %e, "Invariant violation");
            Ack::Reject(e.into())
        }
    }
}

fn decode<T: DeserializeOwned>(delivery: &Delivery) -> Result<T, Ack> {
    delivery.decode().map_err(Ack::Reject)
}

fn log_skip<T>(stage: &str, entity: &str, outcome: &Outcome<T>) {
    if let Outcome::Skipped(reason) = outcome {
        info!(stage, entity, reason = %reason, "Skipped");
    }
}

/// Raw messages through both ingestion gates.
pub struct IngestHandler {
    gates: Vec<Arc<IdempotentIngestionGate>>,
}

impl IngestHandler {
    pub fn new(gates: Vec<Arc<IdempotentIngestionGate>>) -> Self {
        Self { gates }
    }

    async fn run(&self, raw: &RawMessage) -> PipelineResult<()> {
        for gate in &self.gates {
            if let Admission::Skipped(reason) = gate.admit(raw).await? {
                debug!(stream = gate.stream(), message_id = %raw.id, reason = %reason, "Not admitted");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for IngestHandler {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        let raw: RawMessage = match decode(delivery) {
            Ok(raw) => raw,
            Err(ack) => return ack,
        };
        ack_for("ingest", delivery.seq, self.run(&raw).await)
    }
}

pub struct ClassifyHandler {
    classifier: Arc<SimilarityClassifier>,
}

impl ClassifyHandler {
    pub fn new(classifier: Arc<SimilarityClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl DeliveryHandler for ClassifyHandler {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        let raw: RawMessage = match decode(delivery) {
            Ok(raw) => raw,
            Err(ack) => return ack,
        };
        let result = self.classifier.classify(&raw).await.map(|outcome| {
            log_skip("classify", &raw.channel_id, &outcome);
        });
        ack_for("classify", delivery.seq, result)
    }
}

pub struct TagHandler {
    tagger: Arc<ForumPostTagger>,
}

impl TagHandler {
    pub fn new(tagger: Arc<ForumPostTagger>) -> Self {
        Self { tagger }
    }
}

#[async_trait]
impl DeliveryHandler for TagHandler {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        let raw: RawMessage = match decode(delivery) {
            Ok(raw) => raw,
            Err(ack) => return ack,
        };
        let result = self.tagger.tag(&raw).await.map(|outcome| {
            log_skip("tag", &raw.channel_id, &outcome);
        });
        ack_for("tag", delivery.seq, result)
    }
}

pub struct NotifyDuplicateHandler {
    notifier: Arc<DuplicateNotifier>,
}

impl NotifyDuplicateHandler {
    pub fn new(notifier: Arc<DuplicateNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl DeliveryHandler for NotifyDuplicateHandler {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        let event: DuplicatePostEvent = match decode(delivery) {
            Ok(event) => event,
            Err(ack) => return ack,
        };
        ack_for("notify-duplicate", delivery.seq, self.notifier.notify(&event).await)
    }
}

pub struct AlertHandler {
    alerts: Arc<ConversationAlerts>,
}

impl AlertHandler {
    pub fn new(alerts: Arc<ConversationAlerts>) -> Self {
        Self { alerts }
    }
}

#[async_trait]
impl DeliveryHandler for AlertHandler {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        let raw: RawMessage = match decode(delivery) {
            Ok(raw) => raw,
            Err(ack) => return ack,
        };
        let result = self
            .alerts
            .check(std::slice::from_ref(&raw))
            .await
            .map(|_| ());
        ack_for("alerts", delivery.seq, result)
    }
}

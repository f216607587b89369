//! Idempotent ingestion gate.
//!
//! Turns an at-least-once stream of raw messages into exactly one "admitted"
//! event per logical entity. The admission table's unique constraint is the
//! only concurrency guard.
//!
//! Publish is not atomic with the insert. A failed publish returns before
//! commit, so the insert rolls back and redelivery retries the admission. A
//! crash or failed commit after a successful publish leaves an event with no
//! record; the next delivery then admits and publishes again. Once a record is
//! committed, redelivery never republishes.
//!
//! Chat transports usually omit a thread's parent. When the container is the
//! parent and the payload carries none, the gate asks the thread directory.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use forumgate_common::topics::{ADMITTED_COMMUNITY_MESSAGES, ADMITTED_FORUM_POSTS};
use forumgate_common::{AdmissionRecord, PipelineResult, RawMessage};
use forumgate_events::{publish_json, EventBus};

use crate::deadline::with_deadline;
use crate::traits::{AdmissionStore, ThreadDirectory};

/// Which field of the message identifies the logical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKey {
    /// One admission per message.
    Message,
    /// One admission per thread: later replies in the thread are duplicates.
    Thread,
}

/// Which field of the message names its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerField {
    /// The message's channel.
    Channel,
    /// The channel's parent, i.e. the forum a thread belongs to.
    Parent,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub stream: String,
    pub topic: String,
    pub target_container: String,
    pub container: ContainerField,
    pub key: AdmissionKey,
}

impl GateConfig {
    /// Threads opened in the forum `forum_id`.
    pub fn forum_posts(forum_id: impl Into<String>) -> Self {
        Self {
            stream: "forum-posts".to_string(),
            topic: ADMITTED_FORUM_POSTS.to_string(),
            target_container: forum_id.into(),
            container: ContainerField::Parent,
            key: AdmissionKey::Thread,
        }
    }

    /// Messages posted in the channel `channel_id`.
    pub fn community_messages(channel_id: impl Into<String>) -> Self {
        Self {
            stream: "community-messages".to_string(),
            topic: ADMITTED_COMMUNITY_MESSAGES.to_string(),
            target_container: channel_id.into(),
            container: ContainerField::Channel,
            key: AdmissionKey::Message,
        }
    }

    fn key_of<'a>(&self, raw: &'a RawMessage) -> &'a str {
        match self.key {
            AdmissionKey::Message => &raw.id,
            AdmissionKey::Thread => &raw.channel_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { record_id: Uuid },
    /// A prior delivery already admitted this entity. Nothing was published.
    AlreadyExists,
    /// Outside the gate's container. No record, no event.
    Skipped(String),
}

pub struct IdempotentIngestionGate {
    config: GateConfig,
    store: Arc<dyn AdmissionStore>,
    bus: Arc<dyn EventBus>,
    directory: Option<Arc<dyn ThreadDirectory>>,
    call_timeout: Duration,
}

impl IdempotentIngestionGate {
    pub fn new(
        config: GateConfig,
        store: Arc<dyn AdmissionStore>,
        bus: Arc<dyn EventBus>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            directory: None,
            call_timeout,
        }
    }

    /// Resolve missing parents through `directory`.
    pub fn with_directory(mut self, directory: Arc<dyn ThreadDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn stream(&self) -> &str {
        &self.config.stream
    }

    async fn container_of(&self, raw: &RawMessage) -> PipelineResult<Option<String>> {
        match self.config.container {
            ContainerField::Channel => Ok(Some(raw.channel_id.clone())),
            ContainerField::Parent => {
                if let Some(parent) = &raw.parent_id {
                    return Ok(Some(parent.clone()));
                }
                let Some(directory) = &self.directory else {
                    return Ok(None);
                };
                let thread = with_deadline(
                    "thread directory",
                    self.call_timeout,
                    directory.thread(&raw.channel_id),
                )
                .await?;
                Ok(thread.and_then(|t| t.parent_id))
            }
        }
    }

    pub async fn admit(&self, raw: &RawMessage) -> PipelineResult<Admission> {
        let container = self.container_of(raw).await?;
        if container.as_deref() != Some(self.config.target_container.as_str()) {
            let container = container.as_deref().unwrap_or("<none>");
            debug!(
                stream = %self.config.stream,
                message_id = %raw.id,
                container,
                "Message outside target container"
            );
            return Ok(Admission::Skipped(format!(
                "container {container} is not {}",
                self.config.target_container
            )));
        }

        let key = self.config.key_of(raw);
        let record = AdmissionRecord::new(&self.config.stream, key);
        let t = self.call_timeout;

        let mut tx = with_deadline("admission store", t, self.store.begin()).await?;
        let inserted =
            with_deadline("admission store", t, tx.insert_or_skip(&record)).await?;

        if inserted == 0 {
            info!(
                stream = %self.config.stream,
                external_id = %key,
                "Already admitted, not republishing"
            );
            return Ok(Admission::AlreadyExists);
        }

        with_deadline(
            "event bus",
            t,
            publish_json(self.bus.as_ref(), &self.config.topic, raw),
        )
        .await?;

        with_deadline("admission store", t, tx.commit()).await?;

        info!(
            stream = %self.config.stream,
            external_id = %key,
            record_id = %record.id,
            topic = %self.config.topic,
            "Admitted"
        );
        Ok(Admission::Admitted {
            record_id: record.id,
        })
    }

    pub async fn is_admitted(&self, external_id: &str) -> PipelineResult<bool> {
        with_deadline(
            "admission store",
            self.call_timeout,
            self.store.is_admitted(&self.config.stream, external_id),
        )
        .await
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use forumgate_common::topics::{DUPLICATE_FORUM_POSTS, UNIQUE_FORUM_POSTS};
use forumgate_common::{
    ClassificationDecision, Decision, DuplicatePostEvent, PipelineResult, UniquePostEvent,
};
use forumgate_events::{publish_json, EventBus};

use crate::deadline::with_deadline;

/// Publishes classification decisions to their downstream topic.
pub struct EventRouter {
    bus: Arc<dyn EventBus>,
    call_timeout: Duration,
}

impl EventRouter {
    pub fn new(bus: Arc<dyn EventBus>, call_timeout: Duration) -> Self {
        Self { bus, call_timeout }
    }

    /// Topic a decision is published on.
    pub fn topic_for(decision: &ClassificationDecision) -> &'static str {
        match decision.decision {
            Decision::Unique { .. } => UNIQUE_FORUM_POSTS,
            Decision::Duplicate { .. } => DUPLICATE_FORUM_POSTS,
        }
    }

    pub async fn route(&self, decision: &ClassificationDecision) -> PipelineResult<i64> {
        let topic = Self::topic_for(decision);
        let bus = self.bus.as_ref();
        let seq = match &decision.decision {
            Decision::Unique { container_id } => {
                let event = UniquePostEvent {
                    id: decision.entity_id.clone(),
                    guild_id: decision.guild_id.clone(),
                    container_id: container_id.clone(),
                };
                with_deadline("event bus", self.call_timeout, publish_json(bus, topic, &event))
                    .await?
            }
            Decision::Duplicate { matches } => {
                let event = DuplicatePostEvent {
                    id: decision.entity_id.clone(),
                    guild_id: decision.guild_id.clone(),
                    matches: matches.clone(),
                };
                with_deadline("event bus", self.call_timeout, publish_json(bus, topic, &event))
                    .await?
            }
        };

        info!(entity_id = %decision.entity_id, topic, seq, "Decision published");
        Ok(seq)
    }
}

//! Similarity classifier: is an admitted forum post new, or a repeat of an
//! earlier one?

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use forumgate_common::{
    ClassificationDecision, Decision, PipelineConfig, PipelineError, PipelineResult, RawMessage,
    ScoredMatch,
};

use crate::deadline::with_deadline;
use crate::outcome::Outcome;
use crate::router::EventRouter;
use crate::traits::{TextEmbedder, ThreadDirectory, VectorIndex, VectorMatch};

#[derive(Debug, Clone, TypedBuilder)]
pub struct ClassifierConfig {
    #[builder(default = 0.85)]
    pub duplicate_threshold: f32,
    #[builder(default = 5)]
    pub top_k: usize,
    #[builder(default = "Other".to_string(), setter(into))]
    pub uncategorized_label: String,
    #[builder(default = Duration::from_secs(30))]
    pub call_timeout: Duration,
}

impl From<&PipelineConfig> for ClassifierConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            duplicate_threshold: config.duplicate_threshold,
            top_k: config.dedup_top_k,
            uncategorized_label: config.uncategorized_label.clone(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Text that gets embedded for a post.
pub fn build_document(title: &str, body: &str) -> String {
    format!("Title: {title}\n\nContents:\n{body}")
}

/// Matches scoring strictly above `threshold`, excluding `own_id`, best first.
/// Equal scores order by ascending id.
pub fn partition_matches(
    matches: Vec<VectorMatch>,
    threshold: f32,
    own_id: &str,
) -> Vec<ScoredMatch> {
    let mut kept: Vec<ScoredMatch> = matches
        .into_iter()
        .filter(|m| m.id != own_id && m.score > threshold)
        .map(|m| ScoredMatch {
            id: m.id,
            score: m.score,
        })
        .collect();

    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    kept
}

pub struct SimilarityClassifier {
    directory: Arc<dyn ThreadDirectory>,
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn VectorIndex>,
    router: EventRouter,
    config: ClassifierConfig,
}

impl SimilarityClassifier {
    pub fn new(
        directory: Arc<dyn ThreadDirectory>,
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn VectorIndex>,
        router: EventRouter,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            directory,
            embedder,
            index,
            router,
            config,
        }
    }

    /// Classify the post `admitted` opened and publish the decision.
    ///
    /// Unique posts are upserted into the index after the decision is final;
    /// duplicates never are.
    pub async fn classify(
        &self,
        admitted: &RawMessage,
    ) -> PipelineResult<Outcome<ClassificationDecision>> {
        let t = self.config.call_timeout;
        let thread_id = admitted.channel_id.as_str();

        let Some(thread) =
            with_deadline("thread directory", t, self.directory.thread(thread_id)).await?
        else {
            return Ok(Outcome::skipped(format!("thread {thread_id} no longer exists")));
        };

        if thread.applied_tags.is_empty() {
            return Err(PipelineError::not_ready(format!(
                "thread {thread_id} has no tags yet"
            )));
        }

        if thread.has_tag_named(&self.config.uncategorized_label) {
            info!(thread_id, label = %self.config.uncategorized_label, "Skipping uncategorized post");
            return Ok(Outcome::skipped(format!(
                "thread {thread_id} is tagged {}",
                self.config.uncategorized_label
            )));
        }

        let Some(body) =
            with_deadline("thread directory", t, self.directory.first_message(thread_id)).await?
        else {
            return Err(PipelineError::not_ready(format!(
                "thread {thread_id} has no messages yet"
            )));
        };

        let document = build_document(&thread.name, &body);
        let vector = with_deadline("embedder", t, self.embedder.embed(vec![document]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::invariant("embedder returned no vector for one input"))?;

        let candidates = with_deadline(
            "vector index",
            t,
            self.index.query(vector.clone(), self.config.top_k, false),
        )
        .await?;
        debug!(thread_id, candidates = candidates.len(), "Vector index queried");

        let matches = partition_matches(candidates, self.config.duplicate_threshold, thread_id);

        let decision = if matches.is_empty() {
            let container_id = thread
                .parent_id
                .clone()
                .or_else(|| admitted.parent_id.clone())
                .ok_or_else(|| {
                    PipelineError::invariant(format!("thread {thread_id} has no parent forum"))
                })?;

            with_deadline(
                "vector index",
                t,
                self.index
                    .upsert(thread_id, vector, json!({ "forum_channel_id": thread_id })),
            )
            .await?;

            Decision::Unique { container_id }
        } else {
            Decision::Duplicate { matches }
        };

        let decision = ClassificationDecision {
            entity_id: thread.id.clone(),
            guild_id: thread.guild_id.clone(),
            decision,
        };
        info!(
            thread_id,
            duplicate = decision.is_duplicate(),
            "Post classified"
        );

        self.router.route(&decision).await?;
        Ok(Outcome::Done(decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, score: f32) -> VectorMatch {
        VectorMatch {
            id: id.into(),
            score,
            metadata: None,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let kept = partition_matches(vec![m("a", 0.85), m("b", 0.8500001)], 0.85, "self");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b");
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let kept = partition_matches(vec![m("c", 0.9), m("a", 0.9), m("b", 0.95)], 0.85, "self");
        let ids: Vec<&str> = kept.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn own_vector_is_never_a_match() {
        let kept = partition_matches(vec![m("self", 1.0), m("other", 0.9)], 0.85, "self");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "other");
    }

    #[test]
    fn document_layout() {
        assert_eq!(
            build_document("Deploy fails", "Stack trace attached"),
            "Title: Deploy fails\n\nContents:\nStack trace attached"
        );
    }
}

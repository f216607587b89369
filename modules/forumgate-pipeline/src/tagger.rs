use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use forumgate_common::{ForumThread, PipelineConfig, PipelineError, PipelineResult, RawMessage};

use crate::classifier::build_document;
use crate::deadline::with_deadline;
use crate::outcome::Outcome;
use crate::traits::{LabelClassifier, ThreadDirectory};

#[derive(Debug, Clone)]
pub struct TaggerConfig {
    pub uncategorized_label: String,
    pub max_tags: usize,
    pub call_timeout: Duration,
}

impl From<&PipelineConfig> for TaggerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            uncategorized_label: config.uncategorized_label.clone(),
            max_tags: config.max_tags,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Tag ids for `labels`, in the forum's tag order, capped at `max`.
/// Labels the forum does not offer are dropped.
pub fn select_tag_ids(thread: &ForumThread, labels: &[String], max: usize) -> Vec<String> {
    thread
        .available_tags
        .iter()
        .filter(|tag| labels.contains(&tag.name))
        .map(|tag| tag.id.clone())
        .take(max)
        .collect()
}

/// Applies forum tags to freshly admitted posts that have none.
pub struct ForumPostTagger {
    directory: Arc<dyn ThreadDirectory>,
    classifier: Arc<dyn LabelClassifier>,
    config: TaggerConfig,
}

impl ForumPostTagger {
    pub fn new(
        directory: Arc<dyn ThreadDirectory>,
        classifier: Arc<dyn LabelClassifier>,
        config: TaggerConfig,
    ) -> Self {
        Self {
            directory,
            classifier,
            config,
        }
    }

    /// Returns the applied tag ids.
    pub async fn tag(&self, admitted: &RawMessage) -> PipelineResult<Outcome<Vec<String>>> {
        let t = self.config.call_timeout;
        let thread_id = admitted.channel_id.as_str();

        let Some(thread) =
            with_deadline("thread directory", t, self.directory.thread(thread_id)).await?
        else {
            return Ok(Outcome::skipped(format!("thread {thread_id} no longer exists")));
        };

        if !thread.applied_tags.is_empty() {
            info!(thread_id, "Thread already tagged");
            return Ok(Outcome::skipped("thread already has tags"));
        }

        let Some(body) =
            with_deadline("thread directory", t, self.directory.first_message(thread_id)).await?
        else {
            return Err(PipelineError::not_ready(format!(
                "thread {thread_id} has no messages yet"
            )));
        };

        let allowed = thread.tag_names();
        let mut labels = with_deadline(
            "label classifier",
            t,
            self.classifier
                .classify(&build_document(&thread.name, &body), &allowed),
        )
        .await?;

        if labels.is_empty() {
            labels.push(self.config.uncategorized_label.clone());
        }

        let tag_ids = select_tag_ids(&thread, &labels, self.config.max_tags);
        if tag_ids.is_empty() {
            return Ok(Outcome::skipped(format!(
                "forum offers none of the labels {labels:?}"
            )));
        }

        with_deadline(
            "thread directory",
            t,
            self.directory.apply_tags(thread_id, &tag_ids),
        )
        .await?;

        info!(thread_id, tags = ?labels, "Thread tagged");
        Ok(Outcome::Done(tag_ids))
    }
}

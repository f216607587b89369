use std::sync::Arc;

use ai_client::{EmbedAgent, LabelAgent, OpenAi};
use anyhow::Result;
use async_trait::async_trait;

use crate::traits::{LabelClassifier, TextEmbedder, TopicMatcher};

/// Embeddings, tag classification and topic matching through one OpenAI
/// client.
#[derive(Clone)]
pub struct OpenAiAdapter {
    ai: Arc<OpenAi>,
}

impl OpenAiAdapter {
    pub fn new(ai: Arc<OpenAi>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl TextEmbedder for OpenAiAdapter {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.ai.embed_batch(texts).await
    }
}

#[async_trait]
impl LabelClassifier for OpenAiAdapter {
    async fn classify(&self, text: &str, allowed: &[String]) -> Result<Vec<String>> {
        self.ai.classify_labels(text, allowed).await
    }
}

#[async_trait]
impl TopicMatcher for OpenAiAdapter {
    async fn matching_indices(&self, messages: &[String], topics: &[String]) -> Result<Vec<i64>> {
        self.ai.match_topics(messages, topics).await
    }
}

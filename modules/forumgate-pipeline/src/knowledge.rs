//! Knowledge base: relevance lookup over indexed documentation articles.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use forumgate_common::{KnowledgeArticle, PipelineConfig, PipelineError, PipelineResult};

use crate::deadline::with_deadline;
use crate::traits::{TextEmbedder, VectorIndex, VectorMatch};

#[derive(Debug, Clone, TypedBuilder)]
pub struct KnowledgeConfig {
    #[builder(default = 0.3)]
    pub relevance_threshold: f32,
    #[builder(default = 3)]
    pub top_k: usize,
    #[builder(default = Duration::from_secs(30))]
    pub call_timeout: Duration,
}

impl From<&PipelineConfig> for KnowledgeConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            relevance_threshold: config.relevance_threshold,
            top_k: config.relevance_top_k,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Article fields stored as vector metadata.
#[derive(Deserialize)]
struct ArticleMetadata {
    url: String,
    title: String,
    text: String,
}

/// Stable vector id for an article URL.
pub fn article_id(url: &str) -> String {
    STANDARD.encode(format!("kb-{url}"))
}

fn to_article(m: VectorMatch) -> PipelineResult<KnowledgeArticle> {
    let metadata = m.metadata.ok_or_else(|| {
        PipelineError::invariant(format!("knowledge base match {} has no metadata", m.id))
    })?;
    let fields: ArticleMetadata = serde_json::from_value(metadata).map_err(|e| {
        PipelineError::invariant(format!(
            "knowledge base match {} has malformed metadata: {e}",
            m.id
        ))
    })?;
    Ok(KnowledgeArticle {
        id: m.id,
        url: fields.url,
        title: fields.title,
        text: fields.text,
    })
}

pub struct KnowledgeBase {
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn VectorIndex>,
    config: KnowledgeConfig,
}

impl KnowledgeBase {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn VectorIndex>,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Articles scoring strictly above the relevance threshold, best first.
    pub async fn find_relevant(&self, query: &str) -> PipelineResult<Vec<KnowledgeArticle>> {
        let t = self.config.call_timeout;
        let vector = with_deadline("embedder", t, self.embedder.embed(vec![query.to_string()]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::invariant("embedder returned no vector for one input"))?;

        let matches =
            with_deadline("vector index", t, self.index.query(vector, self.config.top_k, true))
                .await?;

        let relevant: Vec<VectorMatch> = matches
            .into_iter()
            .filter(|m| m.score > self.config.relevance_threshold)
            .collect();

        if relevant.is_empty() {
            warn!(query, "No relevant knowledge base articles found");
            return Ok(Vec::new());
        }

        relevant.into_iter().map(to_article).collect()
    }

    /// Embed and upsert articles. Ids derive from the URL, so re-indexing the
    /// same page overwrites it.
    pub async fn index_articles(&self, articles: &[KnowledgeArticle]) -> PipelineResult<usize> {
        if articles.is_empty() {
            return Ok(0);
        }
        let t = self.config.call_timeout;

        let texts: Vec<String> = articles.iter().map(|a| a.text.clone()).collect();
        let vectors = with_deadline("embedder", t, self.embedder.embed(texts)).await?;
        if vectors.len() != articles.len() {
            return Err(PipelineError::invariant(format!(
                "embedder returned {} vectors for {} articles",
                vectors.len(),
                articles.len()
            )));
        }

        for (article, vector) in articles.iter().zip(vectors) {
            let metadata = json!({
                "url": article.url,
                "title": article.title,
                "text": article.text,
            });
            with_deadline(
                "vector index",
                t,
                self.index.upsert(&article_id(&article.url), vector, metadata),
            )
            .await?;
        }

        info!(count = articles.len(), "Knowledge base articles indexed");
        Ok(articles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_id_is_base64_of_prefixed_url() {
        assert_eq!(article_id("a"), "a2ItYQ==");
    }

    #[test]
    fn match_without_metadata_is_an_invariant_violation() {
        let err = to_article(VectorMatch {
            id: "x".into(),
            score: 0.9,
            metadata: None,
        })
        .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn match_missing_a_field_is_an_invariant_violation() {
        let err = to_article(VectorMatch {
            id: "x".into(),
            score: 0.9,
            metadata: Some(json!({"url": "u", "title": "t"})),
        })
        .unwrap_err();
        assert!(err.to_string().contains("malformed metadata"));
    }
}

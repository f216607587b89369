use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// EmbedAgent Trait
// =============================================================================

/// Text to fixed-dimension vectors, one per input, in input order.
#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

// =============================================================================
// LabelAgent Trait
// =============================================================================

/// LLM-backed classification over a closed label set.
#[async_trait]
pub trait LabelAgent: Send + Sync {
    /// Pick zero or more labels out of `allowed` for `text`. An empty result
    /// means the model had no confident label; it is not an error.
    async fn classify_labels(&self, text: &str, allowed: &[String]) -> Result<Vec<String>>;

    /// Return the positions in `items` that match any of `topics`, exactly as
    /// reported by the model. Callers must bounds-check them.
    async fn match_topics(&self, items: &[String], topics: &[String]) -> Result<Vec<i64>>;
}

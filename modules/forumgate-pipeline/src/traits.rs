// Trait seams for every external dependency of the pipeline stages.
//
// Stages hold these as Arc<dyn Trait> so tests swap in the in-memory fakes
// from `testing` without network or database.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use forumgate_common::{AdmissionRecord, ForumThread};

// ---------------------------------------------------------------------------
// Admission store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn AdmissionTx>>;

    async fn is_admitted(&self, stream: &str, external_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait AdmissionTx: Send {
    /// Insert unless (stream, external_id) already exists. Returns rows affected.
    async fn insert_or_skip(&mut self, record: &AdmissionRecord) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Embeddings and vector index
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity, higher is closer.
    pub score: f32,
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite the vector stored under `id`.
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()>;

    /// Top `top_k` nearest vectors, ordered by descending score.
    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>>;
}

// ---------------------------------------------------------------------------
// LLM classification
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LabelClassifier: Send + Sync {
    /// Zero or more labels out of `allowed`. Empty is a valid answer.
    async fn classify(&self, text: &str, allowed: &[String]) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TopicMatcher: Send + Sync {
    /// Positions in `messages` that discuss any of `topics`, as reported by
    /// the model. Not validated.
    async fn matching_indices(&self, messages: &[String], topics: &[String]) -> Result<Vec<i64>>;
}

// ---------------------------------------------------------------------------
// Chat platform
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    /// Rehydrate a forum thread. `None` when the platform does not know it.
    async fn thread(&self, thread_id: &str) -> Result<Option<ForumThread>>;

    /// Clean content of the thread's opening message, once it exists.
    async fn first_message(&self, thread_id: &str) -> Result<Option<String>>;

    async fn apply_tags(&self, thread_id: &str, tag_ids: &[String]) -> Result<()>;

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()>;
}

// Test fakes for the pipeline stages.
//
// One fake per trait boundary:
// - MemoryAdmissionStore (AdmissionStore): claims keys on insert, releases on drop
// - FixedEmbedder (TextEmbedder): deterministic hash-based vectors
// - MemoryVectorIndex (VectorIndex): stored upserts plus scripted query results
// - FixedLabels (LabelClassifier) / FixedTopics (TopicMatcher): canned answers
// - MemoryDirectory (ThreadDirectory): threads, first messages, recorded writes
//
// Plus helpers for constructing RawMessage and ForumThread values.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use forumgate_common::{AdmissionRecord, FileConfig, ForumTag, ForumThread, PipelineConfig, RawMessage};
use forumgate_events::MemoryEventBus;

use crate::deps::PipelineDeps;
use crate::traits::{
    AdmissionStore, AdmissionTx, LabelClassifier, TextEmbedder, ThreadDirectory, TopicMatcher,
    VectorIndex, VectorMatch,
};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

pub const TEST_EMBEDDING_DIM: usize = 32;
pub const FORUM_ID: &str = "1233297799366311977";
pub const COMMUNITY_ID: &str = "1086301297201909864";
pub const GUILD_ID: &str = "1086295234351911024";

// ---------------------------------------------------------------------------
// MemoryAdmissionStore
// ---------------------------------------------------------------------------

type AdmissionKey = (String, String);

#[derive(Default)]
struct AdmissionState {
    committed: HashMap<AdmissionKey, AdmissionRecord>,
    /// Inserted by an open transaction.
    claimed: HashSet<AdmissionKey>,
    fail_begin: bool,
    fail_commit: bool,
}

/// In-memory admission table. An open transaction's insert blocks other
/// inserts of the same key; dropping the transaction uncommitted frees it.
#[derive(Clone, Default)]
pub struct MemoryAdmissionStore {
    state: Arc<Mutex<AdmissionState>>,
}

impl MemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_begin(self) -> Self {
        self.state.lock().unwrap().fail_begin = true;
        self
    }

    pub fn set_failing_commit(&self, fail: bool) {
        self.state.lock().unwrap().fail_commit = fail;
    }

    pub fn records(&self) -> Vec<AdmissionRecord> {
        self.state.lock().unwrap().committed.values().cloned().collect()
    }

    pub fn open_claims(&self) -> usize {
        self.state.lock().unwrap().claimed.len()
    }
}

struct MemoryAdmissionTx {
    state: Arc<Mutex<AdmissionState>>,
    pending: Vec<AdmissionRecord>,
}

#[async_trait]
impl AdmissionStore for MemoryAdmissionStore {
    async fn begin(&self) -> Result<Box<dyn AdmissionTx>> {
        if self.state.lock().unwrap().fail_begin {
            bail!("connection refused");
        }
        Ok(Box::new(MemoryAdmissionTx {
            state: self.state.clone(),
            pending: Vec::new(),
        }))
    }

    async fn is_admitted(&self, stream: &str, external_id: &str) -> Result<bool> {
        let key = (stream.to_string(), external_id.to_string());
        Ok(self.state.lock().unwrap().committed.contains_key(&key))
    }
}

#[async_trait]
impl AdmissionTx for MemoryAdmissionTx {
    async fn insert_or_skip(&mut self, record: &AdmissionRecord) -> Result<u64> {
        let key = (record.stream.clone(), record.external_id.clone());
        let mut state = self.state.lock().unwrap();
        if state.committed.contains_key(&key) || state.claimed.contains(&key) {
            return Ok(0);
        }
        state.claimed.insert(key);
        self.pending.push(record.clone());
        Ok(1)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let shared = self.state.clone();
        let mut state = shared.lock().unwrap();
        if state.fail_commit {
            bail!("commit failed");
        }
        for record in self.pending.drain(..) {
            let key = (record.stream.clone(), record.external_id.clone());
            state.claimed.remove(&key);
            state.committed.insert(key, record);
        }
        Ok(())
    }
}

impl Drop for MemoryAdmissionTx {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            for record in &self.pending {
                state
                    .claimed
                    .remove(&(record.stream.clone(), record.external_id.clone()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder: the same text always maps to the same unit vector.
#[derive(Default)]
pub struct FixedEmbedder {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Every text embedded so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; TEST_EMBEDDING_DIM];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % TEST_EMBEDDING_DIM] += b as f32;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(f32::EPSILON);
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            bail!("embedding API unavailable");
        }
        self.calls.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryVectorIndex
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IndexState {
    entries: HashMap<String, (Vec<f32>, Value)>,
    scripted: Option<Vec<VectorMatch>>,
    fail_query: bool,
    fail_upsert: bool,
}

/// Records upserts. Queries return the scripted matches when set, otherwise
/// cosine similarity over stored entries.
#[derive(Default)]
pub struct MemoryVectorIndex {
    state: Mutex<IndexState>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query with `(id, score)` pairs, highest score first.
    pub fn with_scores(self, scores: &[(&str, f32)]) -> Self {
        self.with_matches(
            scores
                .iter()
                .map(|(id, score)| VectorMatch {
                    id: id.to_string(),
                    score: *score,
                    metadata: None,
                })
                .collect(),
        )
    }

    pub fn with_matches(self, mut matches: Vec<VectorMatch>) -> Self {
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.state.lock().unwrap().scripted = Some(matches);
        self
    }

    pub fn failing_queries(self) -> Self {
        self.state.lock().unwrap().fail_query = true;
        self
    }

    pub fn failing_upserts(self) -> Self {
        self.state.lock().unwrap().fail_upsert = true;
        self
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metadata(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(id)
            .map(|(_, metadata)| metadata.clone())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upsert {
            bail!("index write rejected");
        }
        state.entries.insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>> {
        let state = self.state.lock().unwrap();
        if state.fail_query {
            bail!("index unavailable");
        }
        let mut matches = match &state.scripted {
            Some(scripted) => scripted.clone(),
            None => {
                let mut computed: Vec<VectorMatch> = state
                    .entries
                    .iter()
                    .map(|(id, (stored, metadata))| VectorMatch {
                        id: id.clone(),
                        score: cosine(&vector, stored),
                        metadata: Some(metadata.clone()),
                    })
                    .collect();
                computed.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
                computed
            }
        };
        matches.truncate(top_k);
        if !include_metadata {
            for m in &mut matches {
                m.metadata = None;
            }
        }
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// FixedLabels / FixedTopics
// ---------------------------------------------------------------------------

/// Always answers with the same labels, filtered to the allowed set.
pub struct FixedLabels {
    labels: Vec<String>,
}

impl FixedLabels {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl LabelClassifier for FixedLabels {
    async fn classify(&self, _text: &str, allowed: &[String]) -> Result<Vec<String>> {
        Ok(self
            .labels
            .iter()
            .filter(|l| allowed.contains(l))
            .cloned()
            .collect())
    }
}

/// Always reports the same indices, unvalidated.
pub struct FixedTopics {
    indices: Vec<i64>,
    calls: Mutex<usize>,
}

impl FixedTopics {
    pub fn new(indices: &[i64]) -> Self {
        Self {
            indices: indices.to_vec(),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TopicMatcher for FixedTopics {
    async fn matching_indices(&self, _messages: &[String], _topics: &[String]) -> Result<Vec<i64>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.indices.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DirectoryState {
    threads: HashMap<String, ForumThread>,
    first_messages: HashMap<String, String>,
    sent: Vec<(String, String)>,
    fail_lookups: bool,
    failing_channels: HashSet<String>,
}

/// In-memory chat platform. `apply_tags` updates the stored thread.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread(self, thread: ForumThread, first_message: Option<&str>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(body) = first_message {
                state.first_messages.insert(thread.id.clone(), body.to_string());
            }
            state.threads.insert(thread.id.clone(), thread);
        }
        self
    }

    pub fn failing_lookups(self) -> Self {
        self.state.lock().unwrap().fail_lookups = true;
        self
    }

    /// Sends to `channel_id` fail until restored.
    pub fn fail_sends_to(&self, channel_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_channels
            .insert(channel_id.to_string());
    }

    pub fn restore_sends_to(&self, channel_id: &str) {
        self.state.lock().unwrap().failing_channels.remove(channel_id);
    }

    pub fn thread_now(&self, id: &str) -> Option<ForumThread> {
        self.state.lock().unwrap().threads.get(id).cloned()
    }

    /// Messages sent so far as (channel_id, content).
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl ThreadDirectory for MemoryDirectory {
    async fn thread(&self, thread_id: &str) -> Result<Option<ForumThread>> {
        if self.state.lock().unwrap().fail_lookups {
            bail!("directory unavailable");
        }
        Ok(self.thread_now(thread_id))
    }

    async fn first_message(&self, thread_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .first_messages
            .get(thread_id)
            .cloned())
    }

    async fn apply_tags(&self, thread_id: &str, tag_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(thread) = state.threads.get_mut(thread_id) else {
            bail!("unknown thread {thread_id}");
        };
        thread.applied_tags = tag_ids.to_vec();
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_channels.contains(channel_id) {
            bail!("send to {channel_id} failed");
        }
        state.sent.push((channel_id.to_string(), content.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Tags the test forum offers. "Other" is the uncategorized label.
pub fn forum_tags() -> Vec<ForumTag> {
    [("100", "Bug"), ("101", "Question"), ("102", "Deploy"), ("199", "Other")]
        .into_iter()
        .map(|(id, name)| ForumTag {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// A thread in the test forum with the given applied tag ids.
pub fn forum_thread(id: &str, title: &str, applied_tags: &[&str]) -> ForumThread {
    ForumThread {
        id: id.to_string(),
        parent_id: Some(FORUM_ID.to_string()),
        guild_id: GUILD_ID.to_string(),
        name: title.to_string(),
        applied_tags: applied_tags.iter().map(|s| s.to_string()).collect(),
        available_tags: forum_tags(),
    }
}

/// The opening message of thread `thread_id` in the test forum.
pub fn forum_post(thread_id: &str, content: &str) -> RawMessage {
    RawMessage {
        id: thread_id.to_string(),
        channel_id: thread_id.to_string(),
        parent_id: Some(FORUM_ID.to_string()),
        guild_id: GUILD_ID.to_string(),
        author_id: "author-1".to_string(),
        content: content.to_string(),
        clean_content: content.to_string(),
    }
}

/// A message in the community channel.
pub fn community_message(id: &str, content: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        channel_id: COMMUNITY_ID.to_string(),
        parent_id: None,
        guild_id: GUILD_ID.to_string(),
        author_id: "author-2".to_string(),
        content: content.to_string(),
        clean_content: content.to_string(),
    }
}

pub fn test_config() -> FileConfig {
    FileConfig {
        pipeline: PipelineConfig::new(FORUM_ID, COMMUNITY_ID),
        models: Default::default(),
        bus: Default::default(),
        server: Default::default(),
        alerts: Vec::new(),
    }
}

/// Fakes wired together, with handles kept for assertions.
pub struct TestPipeline {
    pub bus: Arc<MemoryEventBus>,
    pub admissions: MemoryAdmissionStore,
    pub embedder: Arc<FixedEmbedder>,
    pub post_index: Arc<MemoryVectorIndex>,
    pub knowledge_index: Arc<MemoryVectorIndex>,
    pub directory: Arc<MemoryDirectory>,
    pub deps: PipelineDeps,
}

impl TestPipeline {
    pub fn new(directory: MemoryDirectory, post_index: MemoryVectorIndex) -> Self {
        Self::with(
            directory,
            post_index,
            FixedLabels::new(&[]),
            FixedTopics::new(&[]),
            test_config(),
        )
    }

    pub fn with(
        directory: MemoryDirectory,
        post_index: MemoryVectorIndex,
        labels: FixedLabels,
        topics: FixedTopics,
        config: FileConfig,
    ) -> Self {
        let bus = Arc::new(MemoryEventBus::new());
        let admissions = MemoryAdmissionStore::new();
        let embedder = Arc::new(FixedEmbedder::new());
        let post_index = Arc::new(post_index);
        let knowledge_index = Arc::new(MemoryVectorIndex::new());
        let directory = Arc::new(directory);

        let deps = PipelineDeps {
            bus: bus.clone(),
            admissions: Arc::new(admissions.clone()),
            embedder: embedder.clone(),
            post_index: post_index.clone(),
            knowledge_index: knowledge_index.clone(),
            labels: Arc::new(labels),
            topics: Arc::new(topics),
            directory: directory.clone(),
            config: Arc::new(config),
        };

        Self {
            bus,
            admissions,
            embedder,
            post_index,
            knowledge_index,
            directory,
            deps,
        }
    }
}

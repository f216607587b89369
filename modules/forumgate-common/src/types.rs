use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Inbound ---

/// A chat message as delivered by the transport. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// Platform message id, unique per source.
    pub id: String,
    /// Channel the message was posted in. For forum posts this is the thread.
    pub channel_id: String,
    /// Container the channel belongs to (the forum, for threads).
    #[serde(default)]
    pub parent_id: Option<String>,
    pub guild_id: String,
    pub author_id: String,
    pub content: String,
    /// Content with mentions and formatting replaced by plain text.
    pub clean_content: String,
}

// --- Admission ---

/// Proof that an entity passed the ingestion gate. At most one per
/// (stream, external_id); never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub id: Uuid,
    /// Gate instance the record belongs to, e.g. `forum-posts`.
    pub stream: String,
    pub external_id: String,
    pub admitted_at: DateTime<Utc>,
}

impl AdmissionRecord {
    pub fn new(stream: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream: stream.into(),
            external_id: external_id.into(),
            admitted_at: Utc::now(),
        }
    }
}

// --- Forum threads ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumTag {
    pub id: String,
    pub name: String,
}

/// A forum post (thread) as rehydrated from the chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumThread {
    pub id: String,
    pub parent_id: Option<String>,
    pub guild_id: String,
    /// Thread name; used as the post title.
    pub name: String,
    /// Tag ids applied to the thread.
    pub applied_tags: Vec<String>,
    /// Tags the parent forum offers.
    pub available_tags: Vec<ForumTag>,
}

impl ForumThread {
    /// Id of the forum tag called `name`, if the forum defines one.
    pub fn tag_id(&self, name: &str) -> Option<&str> {
        self.available_tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id.as_str())
    }

    /// Whether the tag called `name` is applied to this thread.
    pub fn has_tag_named(&self, name: &str) -> bool {
        self.tag_id(name)
            .is_some_and(|id| self.applied_tags.iter().any(|applied| applied == id))
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.available_tags.iter().map(|t| t.name.clone()).collect()
    }
}

// --- Classification ---

/// A prior post that scored above the duplicate threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Unique { container_id: String },
    /// Matches ordered by descending score.
    Duplicate { matches: Vec<ScoredMatch> },
}

/// Outcome of the similarity stage. Published, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub entity_id: String,
    pub guild_id: String,
    pub decision: Decision,
}

impl ClassificationDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.decision, Decision::Duplicate { .. })
    }
}

// --- Outbound payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniquePostEvent {
    pub id: String,
    pub guild_id: String,
    pub container_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatePostEvent {
    pub id: String,
    pub guild_id: String,
    pub matches: Vec<ScoredMatch>,
}

// --- Reference data ---

/// Search criteria for conversation alerts. Read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAlert {
    pub id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Channel the alert notification goes to.
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    /// Vector id; empty until indexed.
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub title: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(applied: &[&str]) -> ForumThread {
        ForumThread {
            id: "t-1".into(),
            parent_id: Some("forum".into()),
            guild_id: "g".into(),
            name: "Deploy fails".into(),
            applied_tags: applied.iter().map(|s| s.to_string()).collect(),
            available_tags: vec![
                ForumTag { id: "10".into(), name: "Bug".into() },
                ForumTag { id: "11".into(), name: "Other".into() },
            ],
        }
    }

    #[test]
    fn has_tag_named_resolves_through_available_tags() {
        assert!(thread(&["11"]).has_tag_named("Other"));
        assert!(!thread(&["10"]).has_tag_named("Other"));
        assert!(!thread(&["10"]).has_tag_named("Missing"));
    }

    #[test]
    fn raw_message_uses_camel_case_on_the_wire() {
        let json = serde_json::json!({
            "id": "m1",
            "channelId": "c1",
            "guildId": "g1",
            "authorId": "a1",
            "content": "<@1> hi",
            "cleanContent": "@bob hi"
        });
        let message: RawMessage = serde_json::from_value(json).unwrap();
        assert_eq!(message.channel_id, "c1");
        assert_eq!(message.parent_id, None);
        assert_eq!(message.clean_content, "@bob hi");
    }

    #[test]
    fn decision_is_tagged() {
        let decision = ClassificationDecision {
            entity_id: "t-1".into(),
            guild_id: "g".into(),
            decision: Decision::Duplicate {
                matches: vec![ScoredMatch { id: "t-0".into(), score: 0.9 }],
            },
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["decision"]["decision"], "duplicate");
        assert!(decision.is_duplicate());
    }
}

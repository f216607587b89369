mod client;
pub(crate) mod types;

use crate::error::AiError;
use crate::traits::{EmbedAgent, LabelAgent};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use client::OpenAiClient;
use types::{ChatRequest, ToolDefinitionWire, WireMessage};

const TAG_PROMPT: &str = "You triage posts in a product support forum. \
Pick the tags that best describe the post, using only the allowed tags. \
If none of them fit, call the function with an empty list.";

const TOPIC_PROMPT: &str = "You are given numbered community chat messages. \
Report the numbers of the messages that discuss any of these topics: ";

/// Per-message cap when listing messages for topic matching.
const TOPIC_MESSAGE_MAX_BYTES: usize = 2_000;

/// Arguments of the `setMessagesMatchingTopics` tool call.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct TopicMatchArgs {
    /// Numbers of the messages that match the topics.
    matching_messages: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct TagArgs {
    #[serde(default)]
    tags: Vec<String>,
}

/// Tool arguments, minus the markdown fence some models wrap them in.
fn unfence(arguments: &str) -> &str {
    let inner = arguments.trim();
    let inner = inner
        .strip_prefix("```json")
        .or_else(|| inner.strip_prefix("```"))
        .unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Longest prefix of `text` within `max_bytes` that ends on a char boundary.
fn clip(text: &str, max_bytes: usize) -> &str {
    let end = text
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    &text[..end]
}

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    embedding_model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-large".to_string(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Share a preconfigured HTTP client (timeouts, connection pool).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Get the chat model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the embedding model name.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    fn tag_tool(allowed: &[String]) -> ToolDefinitionWire {
        ToolDefinitionWire::function(
            "setTags",
            "Sets the tags of the forum post",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "tags": {
                        "type": "array",
                        "items": { "type": "string", "enum": allowed }
                    }
                },
                "required": ["tags"]
            }),
        )
    }

    fn topic_tool() -> Result<ToolDefinitionWire> {
        let schema = serde_json::to_value(schemars::schema_for!(TopicMatchArgs))?;
        Ok(ToolDefinitionWire::function(
            "setMessagesMatchingTopics",
            "Sets the message numbers matching the given topics",
            schema,
        ))
    }
}

// =============================================================================
// EmbedAgent Implementation
// =============================================================================

#[async_trait]
impl EmbedAgent for OpenAi {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .client()
            .embed_batch(&self.embedding_model, &texts)
            .await?)
    }
}

// =============================================================================
// LabelAgent Implementation
// =============================================================================

#[async_trait]
impl LabelAgent for OpenAi {
    async fn classify_labels(&self, text: &str, allowed: &[String]) -> Result<Vec<String>> {
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(TAG_PROMPT))
            .message(WireMessage::user(text))
            .tool(Self::tag_tool(allowed))
            .temperature(0.0);

        let response = self.client().chat(&request).await?;
        let Some(arguments) = response.tool_arguments("setTags") else {
            warn!("No function call found in completion");
            return Ok(Vec::new());
        };

        let args: TagArgs = serde_json::from_str(unfence(arguments))
            .map_err(|e| AiError::Parse(format!("setTags arguments: {e}")))?;

        Ok(args
            .tags
            .into_iter()
            .filter(|tag| allowed.contains(tag))
            .collect())
    }

    async fn match_topics(&self, items: &[String], topics: &[String]) -> Result<Vec<i64>> {
        if items.is_empty() || topics.is_empty() {
            return Ok(Vec::new());
        }

        let listing: String = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "\nmessage {i}:\n---\n{}\n---\n",
                    clip(item, TOPIC_MESSAGE_MAX_BYTES)
                )
            })
            .collect();

        let request = ChatRequest::new(&self.model)
            .message(WireMessage::system(format!("{TOPIC_PROMPT}{}", topics.join(", "))))
            .message(WireMessage::user("Here are the messages you have to match:"))
            .message(WireMessage::user(listing))
            .tool(Self::topic_tool()?)
            .temperature(0.0);

        let response = self.client().chat(&request).await?;
        let Some(arguments) = response.tool_arguments("setMessagesMatchingTopics") else {
            warn!("No function call found in topic completion");
            return Ok(Vec::new());
        };

        let args: TopicMatchArgs = serde_json::from_str(unfence(arguments))
            .map_err(|e| AiError::Parse(format!("setMessagesMatchingTopics arguments: {e}")))?;

        Ok(args.matching_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model, "gpt-4o");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.embedding_model, "text-embedding-3-large");
    }

    #[test]
    fn test_openai_with_embedding_model() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_embedding_model("text-embedding-3-small");
        assert_eq!(ai.embedding_model(), "text-embedding-3-small");
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_base_url("https://custom.api.com");
        assert_eq!(ai.base_url, Some("https://custom.api.com".to_string()));
    }

    #[test]
    fn tag_tool_restricts_items_to_allowed_labels() {
        let allowed = vec!["Bug".to_string(), "Question".to_string()];
        let tool = OpenAi::tag_tool(&allowed);
        let enum_values = &tool.function.parameters["properties"]["tags"]["items"]["enum"];
        assert_eq!(enum_values, &serde_json::json!(["Bug", "Question"]));
    }

    #[test]
    fn topic_tool_schema_uses_camel_case_field() {
        let tool = OpenAi::topic_tool().unwrap();
        assert!(tool.function.parameters["properties"]
            .get("matchingMessages")
            .is_some());
    }

    #[test]
    fn fenced_tool_arguments_are_unwrapped() {
        assert_eq!(unfence("```json\n{\"tags\":[]}\n```"), "{\"tags\":[]}");
        assert_eq!(unfence("```\n{}\n```"), "{}");
        assert_eq!(unfence(" {} "), "{}");
    }

    #[test]
    fn clip_stops_before_a_split_character() {
        // "é" is two bytes; a 2-byte budget keeps only "a".
        assert_eq!(clip("aé", 2), "a");
        assert_eq!(clip("aé", 3), "aé");
        assert_eq!(clip("message", 100), "message");
        assert_eq!(clip("", 5), "");
    }

    #[tokio::test]
    async fn classify_with_no_allowed_labels_skips_the_call() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_base_url("http://127.0.0.1:9");
        let labels = ai.classify_labels("anything", &[]).await.unwrap();
        assert!(labels.is_empty());
    }
}

//! ThreadDirectory over the Discord REST API.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use forumgate_common::{ForumTag, ForumThread};

use crate::traits::ThreadDirectory;

const BASE_URL: &str = "https://discord.com/api/v10";

#[derive(Error, Debug)]
pub enum DiscordError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    applied_tags: Vec<String>,
    #[serde(default)]
    available_tags: Vec<ChannelTag>,
}

#[derive(Debug, Deserialize)]
struct ChannelTag {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
    #[serde(default)]
    mentions: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

impl Message {
    /// Content with user mentions replaced by `@username`.
    fn clean_content(&self) -> String {
        self.mentions.iter().fold(self.content.clone(), |text, user| {
            text.replace(&format!("<@{}>", user.id), &format!("@{}", user.username))
                .replace(&format!("<@!{}>", user.id), &format!("@{}", user.username))
        })
    }
}

pub struct DiscordDirectory {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl DiscordDirectory {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// GET a resource, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> std::result::Result<Option<T>, DiscordError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DiscordError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(Some(resp.json().await?))
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<(), DiscordError> {
        let resp = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DiscordError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadDirectory for DiscordDirectory {
    async fn thread(&self, thread_id: &str) -> Result<Option<ForumThread>> {
        let Some(thread) = self
            .get_optional::<Channel>(&format!("/channels/{thread_id}"))
            .await?
        else {
            return Ok(None);
        };

        // Tags are defined on the forum, not the thread.
        let available_tags = match &thread.parent_id {
            Some(parent) => self
                .get_optional::<Channel>(&format!("/channels/{parent}"))
                .await?
                .map(|forum| forum.available_tags)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(Some(ForumThread {
            id: thread.id,
            parent_id: thread.parent_id,
            guild_id: thread.guild_id.unwrap_or_default(),
            name: thread.name.unwrap_or_default(),
            applied_tags: thread.applied_tags,
            available_tags: available_tags
                .into_iter()
                .map(|t| ForumTag {
                    id: t.id,
                    name: t.name,
                })
                .collect(),
        }))
    }

    async fn first_message(&self, thread_id: &str) -> Result<Option<String>> {
        // A forum thread's starter message shares the thread's id.
        let message = self
            .get_optional::<Message>(&format!("/channels/{thread_id}/messages/{thread_id}"))
            .await?;
        Ok(message.map(|m| m.clean_content()))
    }

    async fn apply_tags(&self, thread_id: &str, tag_ids: &[String]) -> Result<()> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/channels/{thread_id}"),
            json!({ "applied_tags": tag_ids }),
        )
        .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/channels/{channel_id}/messages"),
            json!({ "content": content }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_content_replaces_both_mention_forms() {
        let message: Message = serde_json::from_value(json!({
            "content": "hey <@42> and <@!7>",
            "mentions": [
                {"id": "42", "username": "ana"},
                {"id": "7", "username": "bo"}
            ]
        }))
        .unwrap();
        assert_eq!(message.clean_content(), "hey @ana and @bo");
    }

    #[test]
    fn thread_channel_parses_without_forum_fields() {
        let channel: Channel = serde_json::from_value(json!({
            "id": "1",
            "type": 11,
            "parent_id": "99",
            "guild_id": "5",
            "name": "Deploy fails",
            "applied_tags": ["10"]
        }))
        .unwrap();
        assert_eq!(channel.applied_tags, vec!["10"]);
        assert!(channel.available_tags.is_empty());
    }
}

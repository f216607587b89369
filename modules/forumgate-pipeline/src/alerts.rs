//! Conversation alerts: flag community messages that hit a watched topic or
//! keyword and post links to them into the alert's channel.
//!
//! Each alert sends at most one notice per message batch. The notice is
//! guarded by an admission record in the `alert-notices` stream, inserted
//! before the send and committed after it, so a redelivery skips alerts that
//! were already delivered.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use forumgate_common::{
    AdmissionRecord, ConversationAlert, PipelineError, PipelineResult, RawMessage,
};

use crate::deadline::with_deadline;
use crate::traits::{AdmissionStore, ThreadDirectory, TopicMatcher};

/// Admission stream of sent alert notices.
pub const NOTICE_STREAM: &str = "alert-notices";

/// Marker key of `alert`'s notice for `messages`.
pub fn notice_key(alert: &ConversationAlert, messages: &[RawMessage]) -> String {
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    format!("{}:{}", alert.id, ids.join(","))
}

/// Map model-reported positions back onto a list of `len` items.
///
/// Negative or out-of-range positions are a broken contract, not a panic.
/// Repeated positions are kept once.
pub fn resolve_indices(indices: &[i64], len: usize) -> PipelineResult<Vec<usize>> {
    let mut resolved = Vec::with_capacity(indices.len());
    for &raw in indices {
        let idx = usize::try_from(raw)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| {
                PipelineError::invariant(format!("topic matcher returned index {raw} for {len} messages"))
            })?;
        if !resolved.contains(&idx) {
            resolved.push(idx);
        }
    }
    Ok(resolved)
}

/// Case-insensitive keyword hits.
pub fn match_keyword<'a>(messages: &'a [RawMessage], keyword: &str) -> Vec<&'a RawMessage> {
    let needle = keyword.to_lowercase();
    messages
        .iter()
        .filter(|m| m.clean_content.to_lowercase().contains(&needle))
        .collect()
}

pub fn message_link(message: &RawMessage) -> String {
    format!(
        "[Link](https://discord.com/channels/{}/{}/{})",
        message.guild_id, message.channel_id, message.id
    )
}

fn links(messages: &[&RawMessage]) -> String {
    messages
        .iter()
        .map(|m| message_link(m))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ConversationAlerts {
    matcher: Arc<dyn TopicMatcher>,
    directory: Arc<dyn ThreadDirectory>,
    notices: Arc<dyn AdmissionStore>,
    alerts: Vec<ConversationAlert>,
    call_timeout: Duration,
}

impl ConversationAlerts {
    pub fn new(
        matcher: Arc<dyn TopicMatcher>,
        directory: Arc<dyn ThreadDirectory>,
        notices: Arc<dyn AdmissionStore>,
        alerts: Vec<ConversationAlert>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            matcher,
            directory,
            notices,
            alerts,
            call_timeout,
        }
    }

    pub fn alerts(&self) -> &[ConversationAlert] {
        &self.alerts
    }

    /// Messages the topic matcher says discuss any of the alert's topics.
    pub async fn match_topics<'a>(
        &self,
        messages: &'a [RawMessage],
        alert: &ConversationAlert,
    ) -> PipelineResult<Vec<&'a RawMessage>> {
        if messages.is_empty() || alert.topics.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = messages.iter().map(|m| m.clean_content.clone()).collect();
        let indices = with_deadline(
            "topic matcher",
            self.call_timeout,
            self.matcher.matching_indices(&contents, &alert.topics),
        )
        .await?;

        Ok(resolve_indices(&indices, messages.len())?
            .into_iter()
            .map(|i| &messages[i])
            .collect())
    }

    /// Topic and keyword sections of `alert`'s notice, or `None` when
    /// nothing matched.
    pub async fn compose_notice(
        &self,
        messages: &[RawMessage],
        alert: &ConversationAlert,
    ) -> PipelineResult<Option<String>> {
        let mut sections = Vec::new();

        let hits = self.match_topics(messages, alert).await?;
        if hits.is_empty() {
            debug!(alert_id = %alert.id, topics = ?alert.topics, "No messages matching topics");
        } else {
            sections.push(format!(
                "🔔 New messages matching topic(s) [{}] found:\n{}",
                alert.topics.join(", "),
                links(&hits)
            ));
        }

        for keyword in &alert.keywords {
            let hits = match_keyword(messages, keyword);
            if !hits.is_empty() {
                sections.push(format!(
                    "🔔 New messages matching keyword \"{keyword}\" found:\n{}",
                    links(&hits)
                ));
            }
        }

        Ok((!sections.is_empty()).then(|| sections.join("\n\n")))
    }

    /// Evaluate every configured alert against `messages`. Returns the number
    /// of notices sent.
    pub async fn check(&self, messages: &[RawMessage]) -> PipelineResult<usize> {
        let mut sent = 0;

        for alert in &self.alerts {
            let Some(notice) = self.compose_notice(messages, alert).await? else {
                continue;
            };
            if self.send_once(alert, messages, &notice).await? {
                sent += 1;
            }
        }

        if sent > 0 {
            info!(messages = messages.len(), notices = sent, "Conversation alerts sent");
        }
        Ok(sent)
    }

    /// Send `notice` unless a previous delivery already did. The marker is
    /// only committed once the send succeeded.
    async fn send_once(
        &self,
        alert: &ConversationAlert,
        messages: &[RawMessage],
        notice: &str,
    ) -> PipelineResult<bool> {
        let t = self.call_timeout;
        let marker = AdmissionRecord::new(NOTICE_STREAM, notice_key(alert, messages));

        let mut tx = with_deadline("admission store", t, self.notices.begin()).await?;
        if with_deadline("admission store", t, tx.insert_or_skip(&marker)).await? == 0 {
            info!(alert_id = %alert.id, key = %marker.external_id, "Alert notice already sent");
            return Ok(false);
        }

        with_deadline(
            "thread directory",
            t,
            self.directory.send_message(&alert.channel_id, notice),
        )
        .await?;
        with_deadline("admission store", t, tx.commit()).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_indices_resolve_once() {
        assert_eq!(resolve_indices(&[2, 0, 2], 3).unwrap(), vec![2, 0]);
    }

    #[test]
    fn out_of_range_index_is_an_invariant_violation() {
        let err = resolve_indices(&[0, 3], 3).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("index 3 for 3 messages"));
    }

    #[test]
    fn negative_index_is_an_invariant_violation() {
        assert!(!resolve_indices(&[-1], 3).unwrap_err().is_retryable());
    }

    #[test]
    fn notice_key_names_alert_and_messages() {
        let alert = ConversationAlert {
            id: "pricing".into(),
            keywords: Vec::new(),
            topics: Vec::new(),
            channel_id: "c".into(),
        };
        let message = |id: &str| RawMessage {
            id: id.into(),
            channel_id: "c".into(),
            parent_id: None,
            guild_id: "g".into(),
            author_id: "a".into(),
            content: String::new(),
            clean_content: String::new(),
        };
        assert_eq!(notice_key(&alert, &[message("m1"), message("m2")]), "pricing:m1,m2");
    }

    #[test]
    fn keyword_match_ignores_case() {
        let message = RawMessage {
            id: "m".into(),
            channel_id: "c".into(),
            parent_id: None,
            guild_id: "g".into(),
            author_id: "a".into(),
            content: "Pricing?".into(),
            clean_content: "Pricing?".into(),
        };
        let messages = [message];
        assert_eq!(match_keyword(&messages, "pricing").len(), 1);
        assert_eq!(
            message_link(&messages[0]),
            "[Link](https://discord.com/channels/g/c/m)"
        );
    }
}

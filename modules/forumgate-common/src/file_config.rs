use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::types::ConversationAlert;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, DB URL, bot token) stay as env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub alerts: Vec<ConversationAlert>,
}

/// Knobs of the ingest, dedup and relevance stages.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Forum whose threads go through dedup.
    pub forum_channel_id: String,
    /// Chat channel whose messages feed conversation alerts.
    pub community_channel_id: String,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_dedup_top_k")]
    pub dedup_top_k: usize,
    #[serde(default = "default_relevance_top_k")]
    pub relevance_top_k: usize,
    /// Forum tag that marks a post as outside every category.
    #[serde(default = "default_uncategorized_label")]
    pub uncategorized_label: String,
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Deadline applied to every external call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    pub chat: String,
    pub embedding: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Redeliveries before a message is dead-lettered.
    pub max_retries: u32,
    /// In-flight deliveries per subscription.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub batch_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_duplicate_threshold() -> f32 {
    0.85
}

fn default_relevance_threshold() -> f32 {
    0.3
}

fn default_dedup_top_k() -> usize {
    5
}

fn default_relevance_top_k() -> usize {
    3
}

fn default_uncategorized_label() -> String {
    "Other".to_string()
}

fn default_max_tags() -> usize {
    5
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl PipelineConfig {
    pub fn new(forum_channel_id: impl Into<String>, community_channel_id: impl Into<String>) -> Self {
        Self {
            forum_channel_id: forum_channel_id.into(),
            community_channel_id: community_channel_id.into(),
            duplicate_threshold: default_duplicate_threshold(),
            relevance_threshold: default_relevance_threshold(),
            dedup_top_k: default_dedup_top_k(),
            relevance_top_k: default_relevance_top_k(),
            uncategorized_label: default_uncategorized_label(),
            max_tags: default_max_tags(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: "gpt-4o-mini".to_string(),
            embedding: "text-embedding-3-large".to_string(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            concurrency: 8,
            poll_interval_ms: 500,
            batch_size: 32,
        }
    }
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

impl FileConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        for (name, value) in [
            ("duplicate_threshold", p.duplicate_threshold),
            ("relevance_threshold", p.relevance_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("pipeline.{name} must be within [0, 1], got {value}");
            }
        }
        if p.dedup_top_k == 0 || p.relevance_top_k == 0 {
            bail!("pipeline top-k values must be positive");
        }
        if p.call_timeout_secs == 0 {
            bail!("pipeline.call_timeout_secs must be positive");
        }
        if self.bus.concurrency == 0 || self.bus.batch_size <= 0 {
            bail!("bus.concurrency and bus.batch_size must be positive");
        }
        Ok(())
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[pipeline]
forum_channel_id = "1233297799366311977"
community_channel_id = "1086301297201909864"
"#;

    #[test]
    fn minimal_config_gets_pipeline_defaults() {
        let config: FileConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.pipeline.duplicate_threshold, 0.85);
        assert_eq!(config.pipeline.relevance_threshold, 0.3);
        assert_eq!(config.pipeline.dedup_top_k, 5);
        assert_eq!(config.pipeline.relevance_top_k, 3);
        assert_eq!(config.pipeline.uncategorized_label, "Other");
        assert_eq!(config.bus.max_retries, 5);
        assert!(config.alerts.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn alerts_parse_from_array_of_tables() {
        let toml = format!(
            "{MINIMAL}\n[[alerts]]\nid = \"a1\"\ntopics = [\"pricing\"]\nchannel_id = \"999\"\n"
        );
        let config: FileConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config.alerts.len(), 1);
        assert_eq!(config.alerts[0].topics, vec!["pricing"]);
        assert!(config.alerts[0].keywords.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = format!("{MINIMAL}\n[mystery]\nvalue = 1\n");
        assert!(toml::from_str::<FileConfig>(&toml).is_err());
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let mut config: FileConfig = toml::from_str(MINIMAL).unwrap();
        config.pipeline.duplicate_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate_threshold"));
    }

    #[test]
    fn load_config_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pipeline.forum_channel_id, "1233297799366311977");
    }
}

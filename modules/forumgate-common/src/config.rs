use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; thresholds, models,
/// alerts and worker settings live in the TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // AI / LLM
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,

    // Chat platform
    pub discord_token: String,
    /// Bearer token required on `POST /raw-messages`.
    pub intake_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is required")?,
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is required")?,
            intake_token: std::env::var("INTAKE_TOKEN").context("INTAKE_TOKEN is required")?,
        };
        if config.intake_token.is_empty() {
            anyhow::bail!("INTAKE_TOKEN must not be empty");
        }

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  OPENAI_API_KEY: {}", preview(&self.openai_api_key));
        tracing::info!(
            "  OPENAI_BASE_URL: {}",
            self.openai_base_url.as_deref().unwrap_or("<default>")
        );
        tracing::info!("  DISCORD_TOKEN: {}", preview(&self.discord_token));
        tracing::info!("  INTAKE_TOKEN: {}", preview(&self.intake_token));
    }
}

fn preview(val: &str) -> String {
    let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.len())
}

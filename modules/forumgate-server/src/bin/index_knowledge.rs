//! Index scraped documentation into the knowledge base.
//!
//! Reads a JSON array of `{url, title, text}` objects and upserts one vector
//! per article. Re-running with the same URLs overwrites them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use forumgate_common::{load_config, AppConfig, KnowledgeArticle};
use forumgate_pipeline::store::{OpenAiAdapter, PgVectorIndex, KNOWLEDGE_INDEX};
use forumgate_pipeline::KnowledgeBase;

#[derive(Parser)]
#[command(name = "index-knowledge", about = "Index documentation articles")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/forumgate.toml")]
    config: PathBuf,

    /// JSON file with the scraped articles
    articles: PathBuf,

    /// Articles embedded per request
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file_config = load_config(&cli.config)?;
    let config = AppConfig::from_env()?;

    let raw = std::fs::read_to_string(&cli.articles)
        .with_context(|| format!("Failed to read {}", cli.articles.display()))?;
    let articles: Vec<KnowledgeArticle> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cli.articles.display()))?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;

    let mut openai = ai_client::OpenAi::new(&config.openai_api_key, &file_config.models.chat)
        .with_embedding_model(&file_config.models.embedding);
    if let Some(url) = &config.openai_base_url {
        openai = openai.with_base_url(url);
    }

    let kb = KnowledgeBase::new(
        Arc::new(OpenAiAdapter::new(Arc::new(openai))),
        Arc::new(PgVectorIndex::new(pool, KNOWLEDGE_INDEX)),
        (&file_config.pipeline).into(),
    );

    let mut indexed = 0;
    for batch in articles.chunks(cli.batch_size.max(1)) {
        indexed += kb.index_articles(batch).await?;
        tracing::info!(indexed, total = articles.len(), "Indexing");
    }

    tracing::info!(indexed, "Knowledge base indexing complete");
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use forumgate_common::{load_config, AppConfig};
use forumgate_events::{run_subscription, subscribe_all, DeliverySource, EventBus, PgEventBus};
use forumgate_pipeline::store::{
    DiscordDirectory, OpenAiAdapter, PgAdmissionStore, PgVectorIndex, KNOWLEDGE_INDEX, POST_INDEX,
};
use forumgate_pipeline::PipelineDeps;
use forumgate_server::routes;

#[derive(Parser)]
#[command(name = "forumgate-server", about = "Forum ingestion, dedup and routing service")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/forumgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting forumgate-server");

    let cli = Cli::parse();
    let config_path = cli.config.canonicalize().with_context(|| {
        format!(
            "Config file not found: {}. Create one or specify --config <path>",
            cli.config.display()
        )
    })?;
    tracing::info!(config = %config_path.display(), "Loading config");

    let file_config = Arc::new(load_config(&config_path)?);
    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    let http_client = reqwest::Client::builder()
        .timeout(file_config.pipeline.call_timeout())
        .build()?;

    let mut openai = ai_client::OpenAi::new(&config.openai_api_key, &file_config.models.chat)
        .with_embedding_model(&file_config.models.embedding)
        .with_http_client(http_client);
    if let Some(url) = &config.openai_base_url {
        openai = openai.with_base_url(url);
    }
    let ai = OpenAiAdapter::new(Arc::new(openai));

    let bus = Arc::new(PgEventBus::new(pool.clone()));

    let deps = PipelineDeps {
        bus: bus.clone(),
        admissions: Arc::new(PgAdmissionStore::new(pool.clone())),
        embedder: Arc::new(ai.clone()),
        post_index: Arc::new(PgVectorIndex::new(pool.clone(), POST_INDEX)),
        knowledge_index: Arc::new(PgVectorIndex::new(pool.clone(), KNOWLEDGE_INDEX)),
        labels: Arc::new(ai.clone()),
        topics: Arc::new(ai),
        directory: Arc::new(DiscordDirectory::new(&config.discord_token)),
        config: file_config.clone(),
    };

    // ─── Workers ─────────────────────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source: Arc<dyn DeliverySource> = bus.clone();
    let bus_config = &file_config.bus;

    // Every subscription exists before intake or any worker can publish.
    let subscriptions = deps.subscriptions();
    subscribe_all(source.as_ref(), subscriptions.iter().map(|(s, _)| s)).await?;

    let mut workers = Vec::new();
    for (subscription, handler) in subscriptions {
        let name = subscription.name.clone();
        let worker = tokio::spawn(run_subscription(
            source.clone(),
            subscription,
            handler,
            bus_config.concurrency,
            bus_config.batch_size,
            bus_config.poll_interval(),
            shutdown_rx.clone(),
        ));
        workers.push((name, worker));
    }
    tracing::info!(workers = workers.len(), "Subscription workers started");

    // ─── HTTP ────────────────────────────────────────────────────────────────

    let state = routes::AppState::new(
        bus.clone() as Arc<dyn EventBus>,
        Arc::new(deps.knowledge_base()),
        config.intake_token.as_str(),
    );
    let app = routes::build_router(state, &file_config.server.allowed_origins);

    let addr = format!("0.0.0.0:{}", file_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true).ok();
    for (name, worker) in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(subscription = %name, error = %e, "Worker failed"),
            Err(e) => tracing::error!(subscription = %name, error = %e, "Worker panicked"),
        }
    }

    Ok(())
}

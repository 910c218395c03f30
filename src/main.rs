// feedreader - a terminal feed reader with incremental three-stage search
//
// Architecture:
// - Store (rusqlite + FTS5): durable item storage, lexical search
// - Search pipeline: FTS -> cosine rerank -> cross-encoder rerank
// - Embedder/Reranker: narrow provider traits, NoOp by default
// - UI (ratatui): single-threaded event loop driving the pipeline
// - Logging: bounded-channel JSONL logger + in-memory ring for the TUI

mod cli;
mod config;
mod embedder;
mod ingest;
mod logging;
mod models;
mod reranker;
mod search;
mod store;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{Config, EmbedderKind, RerankerKind};
use embedder::{Embedder, NoOpEmbedder};
use logging::{EventRing, LogEvent, Logger, RingLogLayer};
use reranker::{NoOpReranker, Reranker};
use std::sync::Arc;
use store::Store;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    match config.embedder {
        EmbedderKind::None => Arc::new(NoOpEmbedder),
        EmbedderKind::Http => {
            #[cfg(feature = "http-providers")]
            {
                Arc::new(embedder::http::HttpEmbedder::new(
                    config.embedder_base_url.clone().unwrap_or_default(),
                    config.embedder_api_key.clone().unwrap_or_default(),
                    config.embedder_model.clone().unwrap_or_default(),
                    1536,
                ))
            }
            #[cfg(not(feature = "http-providers"))]
            {
                tracing::warn!("embedder=http configured but built without the http-providers feature; falling back to none");
                Arc::new(NoOpEmbedder)
            }
        }
    }
}

fn build_reranker(config: &Config) -> Arc<dyn Reranker> {
    match config.reranker {
        RerankerKind::None => Arc::new(NoOpReranker),
        RerankerKind::Http => {
            #[cfg(feature = "http-providers")]
            {
                Arc::new(reranker::http::HttpReranker::new(
                    config.reranker_base_url.clone().unwrap_or_default(),
                    config.reranker_api_key.clone().unwrap_or_default(),
                    config.reranker_model.clone().unwrap_or_default(),
                ))
            }
            #[cfg(not(feature = "http-providers"))]
            {
                tracing::warn!("reranker=http configured but built without the http-providers feature; falling back to none");
                Arc::new(NoOpReranker)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli::handle_cli(&cli) {
        return Ok(());
    }

    Config::ensure_config_exists();
    let mut config = Config::from_env();
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if cli.headless {
        config.verbose_tracing = config.verbose_tracing || logging::verbose_tracing_enabled();
    }

    let ring = EventRing::new(config.ring_capacity);
    let session_id = logging::generate_session_id();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("feedreader={}", config.log_level).into());

    if cli.headless {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(RingLogLayer::new(ring.clone(), session_id.clone()))
            .init();
    }

    tracing::info!(session_id = %session_id, "sys.startup");

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    let store = Arc::new(
        Store::open(&config.db_path)
            .map_err(|e| anyhow::anyhow!("opening store at {}: {e}", config.db_path.display()))
            .context("store initialization failed")?,
    );

    if let Some(Commands::Ingest { path }) = &cli.command {
        let inserted = ingest::ingest_path(&store, path)?;
        println!("Ingested {inserted} new item(s) from {}", path.display());
        store.close();
        return Ok(());
    }

    let log_handle = Logger::spawn(config.log_dir.clone(), session_id.clone(), Some(ring))
        .context("failed to start logger")?;
    log_handle.logger.log(LogEvent::new("sys.startup", "main", session_id.clone()));

    let embedder = build_embedder(&config);
    let reranker = build_reranker(&config);

    if cli.headless {
        tracing::info!("headless mode: store ready, exiting without starting the TUI");
    } else {
        let result = ui::run_tui(store.clone(), embedder, reranker, config, Some(log_handle.logger.clone())).await;
        if let Err(e) = result {
            tracing::error!("ui error: {:?}", e);
        }
    }

    tracing::info!("sys.shutdown");
    log_handle.logger.log(LogEvent::new("sys.shutdown", "main", session_id));
    log_handle.close().await;
    store.close();

    Ok(())
}

// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use anyhow::{Context, Result};
use clap::Parser;
use recall_agent::app::{create_router, AppState, AGENT_NAME, VERSION};
use recall_agent::models::lexicon::Lexicon;
use recall_agent::services::backfill::BackfillRegistry;
use recall_agent::services::completion::{ChatCompletionClient, CompletionConfig};
use recall_agent::services::db::{MemoryMessageStore, MessageStore, PgMessageStore};
use recall_agent::services::grouper::ConversationGrouper;
use recall_agent::services::index_manager::IndexManager;
use recall_agent::services::ingest::Ingestor;
use recall_agent::services::logging::init_tracing;
use recall_agent::services::outbound::{Outbound, WebhookOutbound};
use recall_agent::services::pipeline::{AnswerPipeline, PipelineConfig};
use recall_agent::services::planner::QueryPlanner;
use recall_agent::services::render::{ResponseAssembler, DEFAULT_LINK_BASE};
use recall_agent::services::retriever::{Retriever, RetrieverConfig};
use recall_agent::services::retry::RetryPolicy;
use recall_agent::services::search::{MeiliConfig, MeiliEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "recall-agent",
    version = VERSION,
    about = "Answers questions from group chat history"
)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// TOML file with stop words and topic affinity groups
    #[arg(long, env = "LEXICON_PATH")]
    lexicon: Option<PathBuf>,
}

async fn open_store() -> Result<Arc<dyn MessageStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => {
            let store = PgMessageStore::connect(&url).await?;
            info!("Connected to Postgres message store");
            Ok(Arc::new(store))
        }
        _ => {
            warn!("DATABASE_URL is not set, messages are kept in memory only");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
    }
}

async fn build_state(cli: &Cli) -> Result<AppState> {
    let lexicon = Arc::new(match &cli.lexicon {
        Some(path) => Lexicon::load(path)?,
        None => Lexicon::builtin()?,
    });

    let meili = MeiliConfig::from_env()?;
    let engine = Arc::new(MeiliEngine::new(&meili)?);
    let retry = RetryPolicy::from_env()?;
    let indexes = Arc::new(IndexManager::new(engine, retry, meili.index_prefix.clone()));

    let completion_config = CompletionConfig::from_env()?;
    let completion_retry = RetryPolicy {
        attempt_timeout: completion_config.timeout,
        ..retry
    };
    let completion = Arc::new(ChatCompletionClient::new(completion_config)?);
    let pipeline_config = PipelineConfig::from_env()?;
    let link_base =
        std::env::var("LINK_BASE_URL").unwrap_or_else(|_| DEFAULT_LINK_BASE.to_string());

    let pipeline = AnswerPipeline::new(
        QueryPlanner::new(completion, lexicon.clone()).with_retry(completion_retry),
        Retriever::new(indexes.clone(), RetrieverConfig::from_env()?),
        ConversationGrouper::new(lexicon, pipeline_config.conversation_timeout),
        ResponseAssembler::new(link_base),
        pipeline_config,
    );

    let store = open_store().await?;
    let ingestor = Arc::new(Ingestor::new(indexes));
    let outbound: Option<Arc<dyn Outbound>> = match WebhookOutbound::from_env()? {
        Some(webhook) => Some(Arc::new(webhook)),
        None => {
            info!("OUTBOUND_WEBHOOK_URL is not set, answers are returned over HTTP only");
            None
        }
    };
    let backfills = BackfillRegistry::new(store.clone(), ingestor.clone(), outbound.clone());

    Ok(AppState {
        store,
        ingestor,
        pipeline: Arc::new(pipeline),
        backfills: Arc::new(backfills),
        outbound,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let state = build_state(&cli).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("{AGENT_NAME} v{VERSION} listening on {}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

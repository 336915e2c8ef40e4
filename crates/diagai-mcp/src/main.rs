mod server;

use anyhow::Context;
use rmcp::ServiceExt;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use diagai_core::{Config, FileStore};
use diagai_generate::{
    FrameSequencer, LlmBackend, MarkupGenerator, MermaidInk, Prompter, RandomModel,
    RenderValidator,
};
use diagai_pipeline::{Accounts, GenerationQueue, LocalAssetStore, Orchestrator, Stores, WorkerPool};

use server::DiagaiServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::load().context("loading configuration")?;
    if !config.ai.is_configured() {
        warn!("no AI API key configured; every generation will fail and be refunded");
    }

    let store = Arc::new(
        FileStore::open(config.data_dir.clone())
            .await
            .with_context(|| format!("opening data directory {}", config.data_dir.display()))?,
    );
    let stores = Stores::shared(store);

    let text = Arc::new(LlmBackend::new(&config.ai).context("configuring text generation")?);
    let prompter = Prompter::new(text, Arc::new(RandomModel), config.ai.clone());
    let renderer = Arc::new(MermaidInk::new(&config.render).context("configuring renderer")?);
    let validator = RenderValidator::new(renderer, &config.render);
    let assets = Arc::new(LocalAssetStore::new(config.storage.root.clone()));

    let (queue, receiver) = GenerationQueue::bounded(config.worker.queue_depth);
    let orchestrator = Arc::new(Orchestrator::new(
        stores.clone(),
        MarkupGenerator::new(prompter.clone(), validator.clone()),
        FrameSequencer::new(prompter, validator),
        assets,
        queue,
        config.storage.frame_duration_ms,
    ));

    let reconciled = orchestrator.reconcile_interrupted().await?;
    if reconciled > 0 {
        info!(count = reconciled, "failed and refunded interrupted generations");
    }
    let pool = WorkerPool::spawn(orchestrator.clone(), receiver, config.worker.workers);

    let accounts = Accounts::new(stores.users.clone(), stores.projects.clone());
    let service = DiagaiServer::new(accounts, orchestrator, config.storage.public_base_url.clone())
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| error!("serving error: {e:?}"))?;

    info!(data_dir = %config.data_dir.display(), "diagai MCP server running on stdio");
    service.waiting().await?;

    pool.shutdown().await;
    Ok(())
}

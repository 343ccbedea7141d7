//! rem-worker binary
//!
//! Composes the full background runtime: schema install, scheduler, one
//! worker per tier, and the embedding worker, all sharing one pool and shut
//! down together on ctrl-c.

use rem_agents::{AgentCache, AgentRuntime, ToolRegistry};
use rem_core::{RemConfig, TaskTier};
use rem_crypto::{kms, EncryptionService};
use rem_memory::MemoryService;
use rem_queue::{scheduler_task, TaskQueue, UsageTracker};
use rem_store::{
    install, Db, DbConfig, EmbeddingQueue, EntityStore, KvIndex, PgTenantKeyStore, SchemaRegistry,
};
use rem_worker::handlers::{
    dreaming::DreamingHandler, file::FileHandler, file::PlainTextExtractor, news::NewsHandler,
    reading::ReadingSummaryHandler, HandlerRegistry,
};
use rem_worker::{embedding_worker_task, HttpBlobStore, Worker};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rem_worker=debug".into()),
        )
        .init();

    let config = RemConfig::from_env();
    config.validate()?;

    let db = Db::from_config(&DbConfig::from_env())?;
    install(&db).await?;

    // Crypto stack.
    let kms = kms::backend_from_config(&config.crypto).await?;
    let key_store = Arc::new(PgTenantKeyStore::new(db.clone()));
    let crypto = Arc::new(EncryptionService::new(kms, key_store, config.crypto.clone()));

    // Store stack.
    let registry = Arc::new(SchemaRegistry::new(db.clone()));
    let store = Arc::new(EntityStore::new(db.clone(), registry, Arc::clone(&crypto)));
    let kv = KvIndex::new(db.clone());
    kv.ensure_no_drift().await?;

    // LLM stack.
    let llm_client = rem_llm::OpenAiClient::from_env();
    let embeddings: Arc<dyn rem_llm::EmbeddingProvider> = Arc::new(rem_llm::OpenAiEmbedding::new(
        llm_client.clone(),
        config.embedding.model.clone(),
        config.embedding.dimensions,
    ));
    let chat: Arc<dyn rem_llm::ChatProvider> = Arc::new(rem_llm::OpenAiChat::new(llm_client));

    // Memory and agents.
    let memory = Arc::new(MemoryService::new(Arc::clone(&store), config.context.clone()));
    let agent_cache = Arc::new(AgentCache::new(Arc::clone(&store)));
    let agents = Arc::new(AgentRuntime::new(
        Arc::clone(&memory),
        chat,
        agent_cache,
        ToolRegistry::new(),
    ));

    // Queue and handlers.
    let queue = Arc::new(TaskQueue::new(db.clone()));
    let usage = UsageTracker::new(db.clone());
    let blob = Arc::new(HttpBlobStore::new());

    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(FileHandler::new(
        Arc::clone(&store),
        blob,
        Arc::new(PlainTextExtractor),
    )));
    handlers.register(Arc::new(DreamingHandler::new(
        Arc::clone(&store),
        Arc::clone(&memory),
        Arc::clone(&agents),
        kv.clone(),
    )));
    handlers.register(Arc::new(NewsHandler::new(
        Arc::clone(&store),
        Arc::clone(&agents),
    )));
    handlers.register(Arc::new(ReadingSummaryHandler::new(
        Arc::clone(&store),
        Arc::clone(&agents),
    )));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut joins = Vec::new();

    // Scheduler.
    let scheduler_queue = Arc::clone(&queue);
    let scheduler_config = config.scheduler.clone();
    let scheduler_rx = shutdown_rx.clone();
    joins.push(tokio::spawn(async move {
        scheduler_task(scheduler_queue, scheduler_config, scheduler_rx).await;
    }));

    // One worker per tier.
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    for tier in [TaskTier::Micro, TaskTier::Small, TaskTier::Medium, TaskTier::Large] {
        let worker = Worker::new(
            Arc::clone(&queue),
            usage.clone(),
            Arc::clone(&store),
            handlers.clone(),
            tier,
            format!("{host}-{tier}"),
        );
        let rx = shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            worker.run(rx).await;
        }));
    }

    // Embedding worker.
    let embedding_queue = EmbeddingQueue::new(db.clone());
    joins.push(tokio::spawn(async move {
        embedding_worker_task(embedding_queue, store, embeddings, shutdown_rx).await;
    }));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    for join in joins {
        let _ = join.await;
    }
    Ok(())
}

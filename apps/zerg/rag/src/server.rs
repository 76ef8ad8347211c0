//! Process initialization and lifecycle management
//!
//! This module handles all setup:
//! - Error reporting and tracing initialization
//! - Configuration loading
//! - Qdrant, MongoDB and OpenAI adapters
//! - Background cache maintenance
//! - The stdio request loop

use std::sync::Arc;
use std::time::Duration;

use core_config::{Environment, FromEnv};
use domain_rag::{
    EmbeddingProvider, MongoMetadataStore, MongoStoreConfig, OpenAIConfig, OpenAIProvider,
    QdrantConfig, QdrantVectorStore, RagConfig, RagService, ToolDispatcher,
};
use eyre::{Result, WrapErr};
use tracing::{debug, info};

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the tool service
///
/// 1. Sets up error reports and structured logging (JSON for prod, pretty for dev)
/// 2. Loads configuration for the core and every adapter
/// 3. Connects to Qdrant (creating the collection if needed) and MongoDB
/// 4. Builds the service and dispatcher
/// 5. Serves requests from stdin until it closes
///
/// # Errors
///
/// Returns an error if configuration is missing or malformed, if a store
/// cannot be reached, or if stdio fails.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let config = RagConfig::from_env().wrap_err("Failed to load RAG configuration")?;
    let qdrant_config = QdrantConfig::from_env().wrap_err("Failed to load Qdrant configuration")?;
    let mongo_config =
        MongoStoreConfig::from_env().wrap_err("Failed to load MongoDB configuration")?;
    let openai_config =
        OpenAIConfig::from_env().wrap_err("Failed to load embedding provider configuration")?;

    let provider = Arc::new(OpenAIProvider::new(openai_config));
    info!(
        model = %provider.model(),
        dimension = provider.dimension(),
        "Embedding provider configured"
    );

    info!("Connecting to Qdrant at {}...", qdrant_config.url);
    let vectors = QdrantVectorStore::new(qdrant_config).wrap_err("Failed to connect to Qdrant")?;
    vectors
        .ensure_collection(provider.dimension() as u64)
        .await
        .wrap_err("Failed to prepare Qdrant collection")?;
    info!(collection = vectors.collection(), "Qdrant collection ready");

    info!(database = %mongo_config.database, "Connecting to MongoDB...");
    let metadata = MongoMetadataStore::connect(&mongo_config)
        .await
        .wrap_err("Failed to connect to MongoDB")?;
    info!("Connected to MongoDB successfully");

    let service = Arc::new(RagService::new(vectors, metadata, provider, &config));
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::clone(&service),
        config.dispatch_timeout,
    ));
    info!(
        operations = ?dispatcher.operations(),
        timeout_ms = config.dispatch_timeout.as_millis() as u64,
        "Tool dispatcher ready"
    );

    let maintenance = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = service.cleanup_caches();
            debug!(removed, "Expired cache entries cleaned up");
        }
    });

    info!("Serving tool requests on stdin");
    let result = crate::transport::serve(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await;
    maintenance.abort();

    result.wrap_err("Tool transport failed")?;
    info!("stdin closed, shutting down");
    Ok(())
}

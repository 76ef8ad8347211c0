//! RAG Domain Library
//!
//! Hybrid ingestion and retrieval: documents are embedded and stored as
//! vectors, enriched with structured metadata at query time, and filtered and
//! ranked locally before being returned.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────┐
//!                 │ ToolDispatcher │  ← timeout, envelope, request ids
//!                 └───────┬────────┘
//!                         │
//!                 ┌───────▼────────┐
//!                 │   RagService   │  ← ingest, vectorize, batch, search, delete
//!                 └───┬───────┬────┘
//!                     │       │
//!   ┌─────────────────▼─┐   ┌─▼──────────────────────┐
//!   │ EmbeddingClient   │   │ HybridSearchPipeline   │
//!   │ (RateLimiter,     │   │ (TtlLruCache,          │
//!   │  TtlLruCache)     │   │  MetadataEnricher)     │
//!   └────────┬──────────┘   └──┬──────────────┬──────┘
//!            │                 │              │
//! ┌──────────▼────────┐ ┌──────▼────────────┐ ┌▼──────────────────┐
//! │ EmbeddingProvider │ │ResilientVectorStore│ │  MetadataStore    │
//! │    (trait)        │ │  (RetryPolicy)     │ │    (trait)        │
//! └──────────┬────────┘ └──────┬────────────┘ └┬──────────────────┘
//!            │                 │               │
//! ┌──────────▼────────┐ ┌──────▼────────────┐ ┌▼──────────────────┐
//! │  OpenAIProvider   │ │ QdrantVectorStore │ │MongoMetadataStore │
//! └───────────────────┘ └───────────────────┘ └───────────────────┘
//! ```
//!
//! # Features
//!
//! - **Versioned ingest**: SHA-256 content hashing, version bumps only on change
//! - **Resilient vector access**: every vector store call retried with backoff
//! - **Partial-failure enrichment**: slow or missing metadata never fails a search
//! - **Hybrid filtering**: score threshold, metadata equality, tags, hierarchy path
//! - **Caching**: TTL + LRU caches for query results and embeddings
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_rag::{
//!     MongoMetadataStore, MongoStoreConfig, OpenAIProvider, QdrantConfig, QdrantVectorStore,
//!     RagConfig, RagService, ToolDispatcher, ToolRequest,
//! };
//! use core_config::FromEnv;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RagConfig::from_env()?;
//! let vectors = QdrantVectorStore::new(QdrantConfig::from_env()?)?;
//! let metadata = MongoMetadataStore::connect(&MongoStoreConfig::from_env()?).await?;
//! let provider = Arc::new(OpenAIProvider::from_env()?);
//!
//! let service = Arc::new(RagService::new(vectors, metadata, provider, &config));
//! let dispatcher = ToolDispatcher::new(service, config.dispatch_timeout);
//!
//! let response = dispatcher
//!     .dispatch(ToolRequest::new(
//!         "rag_search",
//!         serde_json::json!({ "query_text": "async rust", "tags": ["rust"], "limit": 5 }),
//!     ))
//!     .await;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod error;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod service;
pub mod vector_store;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, TtlLruCache};
pub use config::RagConfig;
pub use dispatch::{Operation, ToolDispatcher, ToolHandler, ToolRequest, ToolResponse, ToolStatus};
pub use embedding::{EmbeddingClient, EmbeddingProvider, OpenAIConfig, OpenAIProvider};
pub use error::{ErrorKind, RagError, RagResult};
pub use metadata::{
    EnrichmentConfig, MetadataEnricher, MetadataStore, MongoMetadataStore, MongoStoreConfig,
};
pub use models::{
    BatchItemOutcome, BatchOutcome, DeleteOutcome, Document, DocumentMetadata, IngestOutcome,
    ItemStatus, NewDocument, VectorRecord, VectorizeOutcome, VectorizeRequest,
};
pub use pipeline::{EnrichedResult, HybridQuery, HybridSearchPipeline, SearchResponse};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use service::{CacheReport, RagService};
pub use vector_store::{
    QdrantConfig, QdrantVectorStore, ResilientVectorStore, VectorHit, VectorQuery, VectorStore,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::cache::CacheStats;
use crate::config::RagConfig;
use crate::dispatch::{Operation, ToolHandler};
use crate::embedding::{EmbeddingClient, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::metadata::{MetadataEnricher, MetadataStore};
use crate::models::{
    BatchItemOutcome, BatchOutcome, BatchVectorizeRequest, DeleteByTagRequest, DeleteOutcome,
    Document, IngestOutcome, NewDocument, VectorRecord, VectorizeOutcome, VectorizeRequest,
};
use crate::pipeline::{HybridQuery, HybridSearchPipeline, SearchResponse};
use crate::rate_limiter::RateLimiter;
use crate::vector_store::{ResilientVectorStore, VectorStore};

/// Hit/miss counters for both caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub results: Option<CacheStats>,
    pub embeddings: Option<CacheStats>,
}

/// Per-document locks so read-modify-write cycles on one `doc_id` never overlap
#[derive(Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, doc_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map references are neither held nor awaited
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(doc_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Retrieval service providing the exposed operations
///
/// Combines the metadata store (source of truth for documents), the vector
/// store (behind the retry gateway) and the throttled embedding client.
pub struct RagService<S: VectorStore, M: MetadataStore> {
    metadata: Arc<M>,
    vectors: Arc<ResilientVectorStore<S>>,
    embedder: Arc<EmbeddingClient>,
    pipeline: HybridSearchPipeline<S, M>,
    locks: DocumentLocks,
}

impl<S: VectorStore, M: MetadataStore> RagService<S, M> {
    pub fn new(
        vector_store: S,
        metadata_store: M,
        provider: Arc<dyn EmbeddingProvider>,
        config: &RagConfig,
    ) -> Self {
        let metadata = Arc::new(metadata_store);
        let vectors = Arc::new(ResilientVectorStore::new(vector_store, config.retry));
        let limiter = Arc::new(RateLimiter::new(config.embedding_rate_limit));
        let embedder = Arc::new(
            EmbeddingClient::new(provider, limiter).with_cache(config.embedding_cache),
        );
        let pipeline = HybridSearchPipeline::new(
            Arc::clone(&embedder),
            Arc::clone(&vectors),
            MetadataEnricher::new(Arc::clone(&metadata), config.enrichment),
        )
        .with_cache(config.result_cache);

        Self {
            metadata,
            vectors,
            embedder,
            pipeline,
            locks: DocumentLocks::default(),
        }
    }

    // ===== Document lifecycle =====

    /// Create or update the stored document; returns it with the changed flag.
    ///
    /// Concurrent calls for the same `doc_id` run one after another, so each
    /// one reads the version the previous one saved.
    async fn store_document(&self, input: NewDocument) -> RagResult<(Document, bool)> {
        let _guard = self.locks.acquire(&input.doc_id).await;
        let now = Utc::now();
        let (document, changed) = match self.metadata.get_metadata(&input.doc_id).await? {
            Some(mut existing) => {
                let changed = existing.reingest(input, now);
                (existing, changed)
            }
            None => (Document::create(input, now), true),
        };

        self.metadata.save_metadata(&document).await?;
        Ok((document, changed))
    }

    #[instrument(skip(self, input), fields(doc_id = %input.doc_id))]
    pub async fn ingest(&self, input: NewDocument) -> RagResult<IngestOutcome> {
        input.validate()?;

        self.pipeline.invalidate();
        let result = self.store_document(input).await;
        self.pipeline.invalidate();
        let (document, changed) = result?;

        info!(version = document.version, changed, "Document ingested");
        Ok(IngestOutcome::new(&document, changed))
    }

    /// Embed, store and save one document; the vector upsert is left to the caller
    async fn prepare(&self, request: VectorizeRequest) -> RagResult<(Document, bool, VectorRecord)> {
        request.validate()?;
        let input = request.into_new_document();

        // Embed first so a provider failure leaves both stores untouched
        let embedding = self.embedder.embed(&input.content).await?;
        let (document, changed) = self.store_document(input).await?;
        let record = VectorRecord::for_document(&document, embedding);
        Ok((document, changed, record))
    }

    #[instrument(skip(self, request), fields(doc_id = %request.doc_id))]
    pub async fn vectorize(&self, request: VectorizeRequest) -> RagResult<VectorizeOutcome> {
        // Cleared on both sides of the writes: if the call is cancelled midway
        // the writes may still land, and the cache must not outlive them
        self.pipeline.invalidate();
        let result = match self.prepare(request).await {
            Ok((document, changed, record)) => self
                .vectors
                .upsert(record)
                .await
                .map(|()| (document, changed)),
            Err(err) => Err(err),
        };
        self.pipeline.invalidate();
        let (document, changed) = result?;

        info!(version = document.version, changed, "Document vectorized");
        Ok(VectorizeOutcome::new(&document, changed))
    }

    /// Vectorize many documents; one failing document never affects another.
    ///
    /// Prepared records go to the vector store in one batch upsert. If that
    /// fails, each record is retried on its own so failures stay per item.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn batch_vectorize(&self, requests: Vec<VectorizeRequest>) -> RagResult<BatchOutcome> {
        if requests.is_empty() {
            return Err(RagError::Validation(
                "Batch must contain at least one document".to_string(),
            ));
        }

        self.pipeline.invalidate();
        let mut results = Vec::with_capacity(requests.len());
        let mut pending: Vec<(usize, VectorRecord)> = Vec::new();

        for request in requests {
            let doc_id = request.doc_id.clone();
            match self.prepare(request).await {
                Ok((document, _, record)) => {
                    pending.push((results.len(), record));
                    results.push(BatchItemOutcome::success(doc_id, document.version));
                }
                Err(err) => {
                    warn!(doc_id = %doc_id, error = %err, "Batch item failed");
                    results.push(BatchItemOutcome::failed(doc_id, err));
                }
            }
        }

        let records: Vec<VectorRecord> = pending.iter().map(|(_, r)| r.clone()).collect();
        if let Err(err) = self.vectors.upsert_batch(records).await {
            warn!(error = %err, "Batch upsert failed, upserting records individually");
            for (index, record) in pending {
                if let Err(err) = self.vectors.upsert(record).await {
                    let doc_id = results[index].doc_id.clone();
                    results[index] = BatchItemOutcome::failed(doc_id, err);
                }
            }
        }

        self.pipeline.invalidate();

        let outcome = BatchOutcome::new(results);
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Batch vectorize complete"
        );
        Ok(outcome)
    }

    // ===== Retrieval =====

    pub async fn rag_search(&self, query: HybridQuery) -> RagResult<SearchResponse> {
        self.pipeline.search(&query).await
    }

    #[instrument(skip(self))]
    pub async fn delete_by_tag(&self, tag: &str) -> RagResult<DeleteOutcome> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(RagError::Validation("tag must not be empty".to_string()));
        }

        self.pipeline.invalidate();
        let result = self.vectors.delete_by_tag(tag).await;
        self.pipeline.invalidate();
        let deleted_count = result?;

        info!(deleted_count, "Deleted vectors by tag");
        Ok(DeleteOutcome {
            tag: tag.to_string(),
            deleted_count,
        })
    }

    // ===== Maintenance =====

    /// Drop expired entries from both caches; returns how many were removed
    pub fn cleanup_caches(&self) -> usize {
        self.pipeline.cleanup_cache() + self.embedder.cleanup_cache()
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            results: self.pipeline.cache_stats(),
            embeddings: self.embedder.cache_stats(),
        }
    }
}

fn parse_args<T: DeserializeOwned>(operation: Operation, arguments: Value) -> RagResult<T> {
    serde_json::from_value(arguments).map_err(|e| {
        RagError::Validation(format!("Invalid arguments for {}: {}", operation, e))
    })
}

fn to_value<T: Serialize>(value: T) -> RagResult<Value> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl<S, M> ToolHandler for RagService<S, M>
where
    S: VectorStore + 'static,
    M: MetadataStore + 'static,
{
    async fn handle(&self, operation: Operation, arguments: Value) -> RagResult<Value> {
        match operation {
            Operation::Ingest => to_value(self.ingest(parse_args(operation, arguments)?).await?),
            Operation::Vectorize => {
                to_value(self.vectorize(parse_args(operation, arguments)?).await?)
            }
            Operation::BatchVectorize => {
                let request: BatchVectorizeRequest = parse_args(operation, arguments)?;
                to_value(self.batch_vectorize(request.documents).await?)
            }
            Operation::RagSearch => {
                to_value(self.rag_search(parse_args(operation, arguments)?).await?)
            }
            Operation::DeleteByTag => {
                let request: DeleteByTagRequest = parse_args(operation, arguments)?;
                to_value(self.delete_by_tag(&request.tag).await?)
            }
        }
    }
}

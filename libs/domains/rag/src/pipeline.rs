//! Hybrid retrieval: vector similarity, metadata enrichment, then local
//! filtering and ranking.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use validator::Validate;

use crate::cache::{CacheConfig, CacheStats, TtlLruCache};
use crate::embedding::EmbeddingClient;
use crate::error::RagResult;
use crate::metadata::{MetadataEnricher, MetadataStore};
use crate::models::{DocumentMetadata, preview};
use crate::vector_store::{ResilientVectorStore, VectorHit, VectorQuery, VectorStore};

pub const DEFAULT_LIMIT: usize = 10;

/// Candidates requested from the vector store per requested result
pub const OVERFETCH_FACTOR: usize = 2;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Hybrid search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HybridQuery {
    #[validate(length(min = 1, message = "query_text must not be empty"))]
    #[serde(alias = "query")]
    pub query_text: String,

    /// Exact-match metadata constraints; all must hold
    #[serde(default, alias = "metadata_filters")]
    pub filters: BTreeMap<String, Value>,

    /// Match-any tag constraint
    #[serde(default)]
    pub tags: Vec<String>,

    /// Case-insensitive substring of the hierarchy path
    #[serde(default)]
    pub path_query: Option<String>,

    #[validate(range(min = 1, max = 1000, message = "limit must be between 1 and 1000"))]
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl HybridQuery {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            filters: BTreeMap::new(),
            tags: Vec::new(),
            path_query: None,
            limit: DEFAULT_LIMIT,
            score_threshold: None,
        }
    }

    /// Canonical form of the query.
    ///
    /// The text is trimmed, tags go through [`normalize_tags`] and a blank path
    /// counts as absent. The cache key, the vector store filter and the local
    /// filters all read this form, so two queries sharing a key always select
    /// the same documents.
    pub fn normalized(&self) -> Self {
        Self {
            query_text: self.query_text.trim().to_string(),
            filters: self.filters.clone(),
            tags: normalize_tags(&self.tags),
            path_query: self
                .path_query
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            limit: self.limit,
            score_threshold: self.score_threshold,
        }
    }

    /// Stable cache key for this query.
    ///
    /// Hashes the [`normalized`](Self::normalized) query with the path
    /// lowercased and object keys ordered at every depth.
    pub fn fingerprint(&self) -> String {
        let query = self.normalized();
        let normalized = serde_json::json!({
            "query_text": query.query_text,
            "filters": query.filters,
            "tags": query.tags,
            "path_query": query.path_query.map(|p| p.to_lowercase()),
            "limit": query.limit,
            "score_threshold": query.score_threshold,
        });

        let mut canonical = String::new();
        write_canonical(&normalized, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Trimmed, non-empty, sorted and deduplicated
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    normalized.sort_unstable();
    normalized.dedup();
    normalized
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// One ranked search hit with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedResult {
    pub doc_id: String,
    /// Similarity score reported by the vector database
    #[serde(rename = "qdrant_score", alias = "score")]
    pub score: f32,
    pub metadata: DocumentMetadata,
    pub hierarchy_path: String,
    pub content_preview: String,
    pub version: i64,
}

/// Results of a hybrid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<EnrichedResult>,
    pub count: usize,
    /// Whether the results came from the result cache
    pub cached: bool,
}

impl SearchResponse {
    fn new(results: Vec<EnrichedResult>, cached: bool) -> Self {
        Self {
            count: results.len(),
            results,
            cached,
        }
    }
}

/// Apply the local filter stages, in order: score threshold, metadata
/// equality, tags (match-any), hierarchy path (case-insensitive substring).
pub fn apply_filters(candidates: Vec<EnrichedResult>, query: &HybridQuery) -> Vec<EnrichedResult> {
    let path_query = query
        .path_query
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_lowercase);

    let tags = normalize_tags(&query.tags);

    candidates
        .into_iter()
        .filter(|r| query.score_threshold.is_none_or(|t| r.score >= t))
        .filter(|r| {
            query
                .filters
                .iter()
                .all(|(key, expected)| r.metadata.field(key).as_ref() == Some(expected))
        })
        .filter(|r| tags.is_empty() || r.metadata.has_any_tag(&tags))
        .filter(|r| match &path_query {
            Some(needle) => r.hierarchy_path.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .collect()
}

/// Sort by score descending; ties keep a stable order by doc_id
pub fn rank(results: &mut [EnrichedResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

/// Hybrid search over the vector store and metadata store
pub struct HybridSearchPipeline<S: VectorStore, M: MetadataStore> {
    embedder: Arc<EmbeddingClient>,
    vectors: Arc<ResilientVectorStore<S>>,
    enricher: MetadataEnricher<M>,
    cache: Option<TtlLruCache<Vec<EnrichedResult>>>,
}

impl<S: VectorStore, M: MetadataStore> HybridSearchPipeline<S, M> {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        vectors: Arc<ResilientVectorStore<S>>,
        enricher: MetadataEnricher<M>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            enricher,
            cache: None,
        }
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(TtlLruCache::new(config));
        self
    }

    #[instrument(skip(self, query), fields(limit = query.limit, tags = query.tags.len()))]
    pub async fn search(&self, query: &HybridQuery) -> RagResult<SearchResponse> {
        let query = query.normalized();
        query.validate()?;

        let key = query.fingerprint();
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(count = cached.len(), "Result cache hit");
            return Ok(SearchResponse::new(cached, true));
        }

        let embedding = self.embedder.embed(&query.query_text).await?;

        let hits = self
            .vectors
            .search(VectorQuery {
                embedding,
                limit: (query.limit * OVERFETCH_FACTOR) as u64,
                score_threshold: query.score_threshold,
                tag_filter: query.tags.clone(),
            })
            .await?;
        let candidates = dedupe_hits(hits);

        let doc_ids: Vec<String> = candidates.iter().map(|h| h.doc_id.clone()).collect();
        let mut documents = self.enricher.fetch_many(&doc_ids).await;

        let enriched: Vec<EnrichedResult> = candidates
            .into_iter()
            .filter_map(|hit| {
                let document = documents.remove(&hit.doc_id)?;
                Some(EnrichedResult {
                    hierarchy_path: document.metadata.hierarchy_path(),
                    content_preview: preview(&document.content),
                    version: document.version,
                    metadata: document.metadata,
                    doc_id: hit.doc_id,
                    score: hit.score,
                })
            })
            .collect();
        let enriched_count = enriched.len();

        let mut results = apply_filters(enriched, &query);
        rank(&mut results);
        results.truncate(query.limit);

        debug!(
            enriched = enriched_count,
            returned = results.len(),
            "Hybrid search complete"
        );

        if let Some(cache) = &self.cache {
            cache.put(key, results.clone());
        }

        Ok(SearchResponse::new(results, false))
    }

    /// Drop all cached results; called after every write
    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cleanup_cache(&self) -> usize {
        self.cache
            .as_ref()
            .map(TtlLruCache::cleanup_expired)
            .unwrap_or(0)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(TtlLruCache::stats)
    }
}

/// Keep the best-scoring hit per document
fn dedupe_hits(hits: Vec<VectorHit>) -> Vec<VectorHit> {
    let mut seen = HashSet::new();
    let mut sorted = hits;
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted
        .into_iter()
        .filter(|hit| seen.insert(hit.doc_id.clone()))
        .collect()
}

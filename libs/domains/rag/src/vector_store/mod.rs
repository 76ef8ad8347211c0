mod gateway;
mod qdrant;

pub use gateway::ResilientVectorStore;
pub use qdrant::{QdrantConfig, QdrantVectorStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RagResult;
use crate::models::VectorRecord;

/// Similarity search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub limit: u64,
    pub score_threshold: Option<f32>,
    /// Match-any tag filter; empty means unfiltered
    pub tag_filter: Vec<String>,
}

/// One similarity hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub doc_id: String,
    pub score: f32,
    pub payload: Option<serde_json::Value>,
}

/// Contract of the external vector database.
///
/// Implementations are raw adapters; callers inside this crate reach them
/// only through [`ResilientVectorStore`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> RagResult<()>;

    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> RagResult<usize>;

    async fn search(&self, query: VectorQuery) -> RagResult<Vec<VectorHit>>;

    /// Delete every point carrying `tag`; returns the number removed
    async fn delete_by_tag(&self, tag: &str) -> RagResult<u64>;
}

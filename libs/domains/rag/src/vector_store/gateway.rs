use tracing::instrument;

use super::{VectorHit, VectorQuery, VectorStore};
use crate::error::RagResult;
use crate::models::VectorRecord;
use crate::retry::RetryPolicy;

/// Retry wrapper around a [`VectorStore`].
///
/// Every vector database call in the crate goes through this type. Transient
/// failures are retried with exponential backoff; anything else surfaces on
/// the first attempt.
pub struct ResilientVectorStore<S: VectorStore> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: VectorStore> ResilientVectorStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[instrument(skip(self, record), fields(doc_id = %record.doc_id))]
    pub async fn upsert(&self, record: VectorRecord) -> RagResult<()> {
        self.policy
            .run("vector.upsert", || self.inner.upsert(record.clone()))
            .await
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert_batch(&self, records: Vec<VectorRecord>) -> RagResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.policy
            .run("vector.upsert_batch", || {
                self.inner.upsert_batch(records.clone())
            })
            .await
    }

    #[instrument(skip(self, query), fields(limit = query.limit))]
    pub async fn search(&self, query: VectorQuery) -> RagResult<Vec<VectorHit>> {
        self.policy
            .run("vector.search", || self.inner.search(query.clone()))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_by_tag(&self, tag: &str) -> RagResult<u64> {
        self.policy
            .run("vector.delete_by_tag", || self.inner.delete_by_tag(tag))
            .await
    }
}

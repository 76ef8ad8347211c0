use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::MetadataStore;
use crate::error::{RagError, RagResult};
use crate::models::Document;

/// Timeouts for batch enrichment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentConfig {
    /// Bound on each per-document fetch
    pub item_timeout: Duration,
    /// Bound on the single bulk existence check
    pub bulk_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_millis(250),
            bulk_timeout: Duration::from_millis(1000),
        }
    }
}

/// Fetches metadata for many documents, tolerating per-document failures.
///
/// A document that is missing, fails, or exceeds its timeout is left out of
/// the result. Nothing here fails the batch as a whole.
pub struct MetadataEnricher<M: MetadataStore> {
    store: Arc<M>,
    config: EnrichmentConfig,
}

impl<M: MetadataStore> MetadataEnricher<M> {
    pub fn new(store: Arc<M>, config: EnrichmentConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> EnrichmentConfig {
        self.config
    }

    #[instrument(skip(self, doc_ids), fields(requested = doc_ids.len()))]
    pub async fn fetch_many(&self, doc_ids: &[String]) -> HashMap<String, Document> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = doc_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();

        if unique.is_empty() {
            return HashMap::new();
        }

        let fetched = match self.bulk_exists(&unique).await {
            Ok(existing) => {
                let confirmed: Vec<&String> = unique
                    .iter()
                    .filter(|id| existing.get(id.as_str()).copied().unwrap_or(false))
                    .collect();
                join_all(confirmed.into_iter().map(|id| self.fetch_one(id))).await
            }
            Err(err) => {
                warn!(error = %err, "Bulk existence check failed, falling back to per-document fetch");
                join_all(unique.iter().map(|id| self.check_and_fetch_one(id))).await
            }
        };

        let result: HashMap<String, Document> = fetched
            .into_iter()
            .flatten()
            .map(|document| (document.doc_id.clone(), document))
            .collect();

        debug!(enriched = result.len(), "Enrichment complete");
        result
    }

    async fn bulk_exists(&self, doc_ids: &[String]) -> RagResult<HashMap<String, bool>> {
        let bulk_timeout = self.config.bulk_timeout;
        match timeout(bulk_timeout, self.store.batch_exists(doc_ids)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout(bulk_timeout.as_millis() as u64)),
        }
    }

    async fn fetch_one(&self, doc_id: &str) -> Option<Document> {
        let outcome = timeout(self.config.item_timeout, self.store.get_metadata(doc_id)).await;
        Self::absorb(doc_id, outcome)
    }

    async fn check_and_fetch_one(&self, doc_id: &str) -> Option<Document> {
        let lookup = async {
            if self.store.exists(doc_id).await? {
                self.store.get_metadata(doc_id).await
            } else {
                Ok(None)
            }
        };
        Self::absorb(doc_id, timeout(self.config.item_timeout, lookup).await)
    }

    fn absorb(
        doc_id: &str,
        outcome: Result<RagResult<Option<Document>>, tokio::time::error::Elapsed>,
    ) -> Option<Document> {
        match outcome {
            Ok(Ok(document)) => document,
            Ok(Err(err)) => {
                debug!(doc_id, error = %err, "Metadata fetch failed");
                None
            }
            Err(_) => {
                debug!(doc_id, "Metadata fetch timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MockMetadataStore;
    use crate::models::NewDocument;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn document(id: &str) -> Document {
        Document::create(
            NewDocument {
                doc_id: id.into(),
                content: format!("content of {}", id),
                metadata: Default::default(),
            },
            Utc::now(),
        )
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Store with per-document latency, for timeout paths
    struct SlowStore {
        documents: HashMap<String, (Document, Duration)>,
        bulk_fails: bool,
        calls: AtomicUsize,
    }

    impl SlowStore {
        fn new(bulk_fails: bool) -> Self {
            Self {
                documents: HashMap::new(),
                bulk_fails,
                calls: AtomicUsize::new(0),
            }
        }

        fn with(mut self, id: &str, delay_ms: u64) -> Self {
            self.documents
                .insert(id.into(), (document(id), Duration::from_millis(delay_ms)));
            self
        }
    }

    #[async_trait]
    impl MetadataStore for SlowStore {
        async fn exists(&self, doc_id: &str) -> RagResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.contains_key(doc_id))
        }

        async fn batch_exists(&self, doc_ids: &[String]) -> RagResult<HashMap<String, bool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.bulk_fails {
                return Err(RagError::Transient("bulk lookup unavailable".into()));
            }
            Ok(doc_ids
                .iter()
                .map(|id| (id.clone(), self.documents.contains_key(id)))
                .collect())
        }

        async fn get_metadata(&self, doc_id: &str) -> RagResult<Option<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.documents.get(doc_id) {
                Some((document, delay)) => {
                    tokio::time::sleep(*delay).await;
                    Ok(Some(document.clone()))
                }
                None => Ok(None),
            }
        }

        async fn save_metadata(&self, _document: &Document) -> RagResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let mut store = MockMetadataStore::new();
        store.expect_batch_exists().never();
        store.expect_get_metadata().never();
        store.expect_exists().never();

        let enricher = MetadataEnricher::new(Arc::new(store), EnrichmentConfig::default());
        assert!(enricher.fetch_many(&[]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_and_missing_documents_are_omitted() {
        let store = Arc::new(SlowStore::new(false).with("a", 10).with("b", 1000));
        let enricher = MetadataEnricher::new(store, EnrichmentConfig::default());

        let result = enricher.fetch_many(&ids(&["a", "b", "c"])).await;

        assert_eq!(result.len(), 1);
        assert!(result.contains_key("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_when_bulk_check_fails() {
        let store = Arc::new(SlowStore::new(true).with("a", 10).with("b", 1000));
        let enricher = MetadataEnricher::new(Arc::clone(&store), EnrichmentConfig::default());

        let result = enricher.fetch_many(&ids(&["a", "b", "c"])).await;

        assert_eq!(result.len(), 1);
        assert!(result.contains_key("a"));
        // bulk + exists for each id + get for the two that exist
        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let store = Arc::new(
            SlowStore::new(false)
                .with("a", 200)
                .with("b", 200)
                .with("c", 200),
        );
        let enricher = MetadataEnricher::new(store, EnrichmentConfig::default());

        let start = tokio::time::Instant::now();
        let result = enricher.fetch_many(&ids(&["a", "b", "c"])).await;

        assert_eq!(result.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_fetched_once() {
        let mut store = MockMetadataStore::new();
        store.expect_batch_exists().times(1).returning(|ids| {
            assert_eq!(ids.len(), 1);
            Ok(ids.iter().map(|id| (id.clone(), true)).collect())
        });
        store
            .expect_get_metadata()
            .times(1)
            .returning(|id| Ok(Some(document(id))));

        let enricher = MetadataEnricher::new(Arc::new(store), EnrichmentConfig::default());
        let result = enricher.fetch_many(&ids(&["a", "a"])).await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_item_error_is_absorbed() {
        let mut store = MockMetadataStore::new();
        store
            .expect_batch_exists()
            .returning(|ids| Ok(ids.iter().map(|id| (id.clone(), true)).collect()));
        store.expect_get_metadata().returning(|id| {
            if id == "bad" {
                Err(RagError::Fatal("corrupt record".into()))
            } else {
                Ok(Some(document(id)))
            }
        });

        let enricher = MetadataEnricher::new(Arc::new(store), EnrichmentConfig::default());
        let result = enricher.fetch_many(&ids(&["good", "bad"])).await;
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("good"));
    }
}

mod enrichment;
mod mongodb;

pub use enrichment::{EnrichmentConfig, MetadataEnricher};
pub use mongodb::{MongoMetadataStore, MongoStoreConfig};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RagResult;
use crate::models::Document;

/// Contract of the external metadata store.
///
/// Documents are keyed by `doc_id`. The store is the source of truth for
/// content, metadata and version; the vector store only mirrors a subset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn exists(&self, doc_id: &str) -> RagResult<bool>;

    /// Existence check for many ids in one round trip; every requested id
    /// appears in the result
    async fn batch_exists(&self, doc_ids: &[String]) -> RagResult<HashMap<String, bool>>;

    async fn get_metadata(&self, doc_id: &str) -> RagResult<Option<Document>>;

    /// Insert or replace the document stored under its `doc_id`
    async fn save_metadata(&self, document: &Document) -> RagResult<()>;
}

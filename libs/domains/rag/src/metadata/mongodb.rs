//! MongoDB implementation of MetadataStore

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_required};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database,
    bson::{Document as BsonDocument, doc},
    options::ClientOptions,
};
use serde::Deserialize;
use tracing::{info, instrument};

use super::MetadataStore;
use crate::error::{RagError, RagResult};
use crate::models::Document;

/// MongoDB connection settings for the metadata store
#[derive(Debug, Clone)]
pub struct MongoStoreConfig {
    pub url: String,
    pub database: String,
    pub collection: String,
}

impl MongoStoreConfig {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            collection: "documents".to_string(),
        }
    }
}

impl FromEnv for MongoStoreConfig {
    /// Requires MONGODB_URL and MONGODB_DATABASE
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("MONGODB_URL")?,
            database: env_required("MONGODB_DATABASE")?,
            collection: env_or_default("MONGODB_COLLECTION", "documents"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id")]
    id: String,
}

/// MongoDB implementation of the MetadataStore
pub struct MongoMetadataStore {
    collection: Collection<Document>,
}

impl MongoMetadataStore {
    pub fn new(db: Database, collection_name: &str) -> Self {
        Self {
            collection: db.collection::<Document>(collection_name),
        }
    }

    /// Connect, verify the server answers, and bind to the configured collection
    pub async fn connect(config: &MongoStoreConfig) -> RagResult<Self> {
        info!(database = %config.database, "Connecting to MongoDB");

        let mut options = ClientOptions::parse(&config.url).await?;
        options.max_pool_size = Some(100);
        options.min_pool_size = Some(5);
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(30));

        let client = Client::with_options(options)?;
        let db = client.database(&config.database);
        db.run_command(doc! { "ping": 1 }).await?;

        info!("Connected to MongoDB");
        Ok(Self::new(db, &config.collection))
    }

    fn id_filter(doc_id: &str) -> BsonDocument {
        doc! { "_id": doc_id }
    }

    /// Matches the stored record only while its version is not newer than
    /// `document`'s. A stale save then misses the filter and its upsert
    /// collides on `_id` instead of overwriting the newer record.
    fn save_filter(document: &Document) -> BsonDocument {
        doc! { "_id": &document.doc_id, "version": { "$lte": document.version } }
    }
}

#[async_trait]
impl MetadataStore for MongoMetadataStore {
    #[instrument(skip(self))]
    async fn exists(&self, doc_id: &str) -> RagResult<bool> {
        let count = self
            .collection
            .count_documents(Self::id_filter(doc_id))
            .limit(1)
            .await?;
        Ok(count > 0)
    }

    #[instrument(skip(self, doc_ids), fields(count = doc_ids.len()))]
    async fn batch_exists(&self, doc_ids: &[String]) -> RagResult<HashMap<String, bool>> {
        let mut result: HashMap<String, bool> =
            doc_ids.iter().map(|id| (id.clone(), false)).collect();
        if doc_ids.is_empty() {
            return Ok(result);
        }

        let cursor = self
            .collection
            .clone_with_type::<IdOnly>()
            .find(doc! { "_id": { "$in": doc_ids.to_vec() } })
            .projection(doc! { "_id": 1 })
            .await?;
        let found: Vec<IdOnly> = cursor.try_collect().await?;

        for IdOnly { id } in found {
            result.insert(id, true);
        }
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, doc_id: &str) -> RagResult<Option<Document>> {
        Ok(self.collection.find_one(Self::id_filter(doc_id)).await?)
    }

    #[instrument(skip(self, document), fields(doc_id = %document.doc_id, version = document.version))]
    async fn save_metadata(&self, document: &Document) -> RagResult<()> {
        match self
            .collection
            .replace_one(Self::save_filter(document), document)
            .upsert(true)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(RagError::Fatal(format!(
                "Stale write for '{}': a newer version than {} is stored",
                document.doc_id, document.version
            ))),
            Err(err) => Err(err.into()),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

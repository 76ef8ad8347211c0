use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse};
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    self, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use tracing::{debug, info, instrument};

use super::{VectorHit, VectorQuery, VectorStore};
use crate::error::{RagError, RagResult};
use crate::models::VectorRecord;

/// Qdrant connection configuration
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub collection: String,
}

impl QdrantConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            timeout_secs: 30,
            collection: "documents".to_string(),
        }
    }
}

impl FromEnv for QdrantConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("QDRANT_URL", "http://localhost:6334"),
            api_key: env_optional("QDRANT_API_KEY"),
            timeout_secs: env_parse("QDRANT_TIMEOUT_SECS", 30)?,
            collection: env_or_default("QDRANT_COLLECTION", "documents"),
        })
    }
}

/// Qdrant-backed [`VectorStore`] bound to a single collection
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    pub fn new(config: QdrantConfig) -> RagResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(api_key) = config.api_key {
            builder = builder.api_key(api_key);
        }

        builder = builder.timeout(Duration::from_secs(config.timeout_secs));

        let client = builder
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            collection: config.collection,
        })
    }

    pub fn from_client(client: Qdrant, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection with cosine distance if it does not exist yet
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn ensure_collection(&self, dimension: u64) -> RagResult<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await?;

        info!(dimension, "Created collection");
        Ok(())
    }

    fn to_point(record: VectorRecord) -> PointStruct {
        PointStruct::new(
            PointId::from(record.vector_id.to_string()),
            record.embedding,
            payload_to_qdrant(record.payload),
        )
    }
}

fn tags_filter(tags: &[String]) -> Filter {
    Filter::must([Condition::matches("tags", tags.to_vec())])
}

fn payload_to_qdrant(payload: serde_json::Value) -> HashMap<String, QdrantValue> {
    let mut result = HashMap::new();

    if let serde_json::Value::Object(map) = payload {
        for (key, val) in map {
            if let Some(qdrant_val) = json_to_qdrant_value(val) {
                result.insert(key, qdrant_val);
            }
        }
    }

    result
}

fn qdrant_to_payload(payload: HashMap<String, QdrantValue>) -> Option<serde_json::Value> {
    if payload.is_empty() {
        return None;
    }

    let map = payload
        .into_iter()
        .filter_map(|(key, val)| qdrant_value_to_json(val).map(|json| (key, json)))
        .collect();

    Some(serde_json::Value::Object(map))
}

fn json_to_qdrant_value(val: serde_json::Value) -> Option<QdrantValue> {
    use qdrant::value::Kind;

    match val {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(QdrantValue::from(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(QdrantValue::from(i))
            } else {
                n.as_f64().map(QdrantValue::from)
            }
        }
        serde_json::Value::String(s) => Some(QdrantValue::from(s)),
        // Arrays stay arrays so keyword filters on `tags` match element-wise
        serde_json::Value::Array(items) => Some(QdrantValue {
            kind: Some(Kind::ListValue(qdrant::ListValue {
                values: items.into_iter().filter_map(json_to_qdrant_value).collect(),
            })),
        }),
        serde_json::Value::Object(map) => Some(QdrantValue {
            kind: Some(Kind::StructValue(qdrant::Struct {
                fields: map
                    .into_iter()
                    .filter_map(|(k, v)| json_to_qdrant_value(v).map(|v| (k, v)))
                    .collect(),
            })),
        }),
    }
}

fn qdrant_value_to_json(val: QdrantValue) -> Option<serde_json::Value> {
    use qdrant::value::Kind;

    match val.kind {
        Some(Kind::NullValue(_)) => Some(serde_json::Value::Null),
        Some(Kind::BoolValue(b)) => Some(serde_json::Value::Bool(b)),
        Some(Kind::IntegerValue(i)) => Some(serde_json::Value::Number(i.into())),
        Some(Kind::DoubleValue(f)) => {
            serde_json::Number::from_f64(f).map(serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => Some(serde_json::Value::String(s)),
        Some(Kind::ListValue(list)) => Some(serde_json::Value::Array(
            list.values
                .into_iter()
                .filter_map(qdrant_value_to_json)
                .collect(),
        )),
        Some(Kind::StructValue(st)) => Some(serde_json::Value::Object(
            st.fields
                .into_iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|v| (k, v)))
                .collect(),
        )),
        None => None,
    }
}

fn doc_id_from_payload(payload: &Option<serde_json::Value>) -> Option<String> {
    payload
        .as_ref()?
        .get("doc_id")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, record: VectorRecord) -> RagResult<()> {
        let point = Self::to_point(record);
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await?;
        Ok(())
    }

    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> RagResult<usize> {
        let count = records.len();
        let points: Vec<PointStruct> = records.into_iter().map(Self::to_point).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;

        Ok(count)
    }

    async fn search(&self, query: VectorQuery) -> RagResult<Vec<VectorHit>> {
        let mut builder = SearchPointsBuilder::new(&self.collection, query.embedding, query.limit)
            .with_payload(true);

        if let Some(threshold) = query.score_threshold {
            builder = builder.score_threshold(threshold);
        }

        if !query.tag_filter.is_empty() {
            builder = builder.filter(tags_filter(&query.tag_filter));
        }

        let response = self.client.search_points(builder).await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = qdrant_to_payload(point.payload);
                // Points written outside this crate may lack a doc_id; they
                // cannot be enriched, so they are skipped here.
                let doc_id = doc_id_from_payload(&payload)?;
                Some(VectorHit {
                    doc_id,
                    score: point.score,
                    payload,
                })
            })
            .collect())
    }

    async fn delete_by_tag(&self, tag: &str) -> RagResult<u64> {
        let tags = [tag.to_string()];

        let count = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(tags_filter(&tags))
                    .exact(true),
            )
            .await?
            .result
            .map(|r| r.count)
            .unwrap_or(0);

        if count == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(tags_filter(&tags))
                    .wait(true),
            )
            .await?;

        Ok(count)
    }
}

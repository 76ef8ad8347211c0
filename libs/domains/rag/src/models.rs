use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

/// Separator between hierarchy levels in a breadcrumb path
pub const PATH_SEPARATOR: &str = " > ";

/// Path reported for documents without any classification fields
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Number of characters kept in a content preview
pub const PREVIEW_CHARS: usize = 200;

/// Document metadata: well-known classification fields plus a free-form side map.
///
/// Unknown keys land in `extra` and round-trip unchanged, so callers can
/// attach arbitrary attributes and still filter on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_6: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    pub fn levels(&self) -> [Option<&str>; 6] {
        [
            self.level_1.as_deref(),
            self.level_2.as_deref(),
            self.level_3.as_deref(),
            self.level_4.as_deref(),
            self.level_5.as_deref(),
            self.level_6.as_deref(),
        ]
    }

    /// Breadcrumb built from the non-empty hierarchy levels.
    ///
    /// Documents without levels fall back to category, author and title, in
    /// that order; with none of those the path is [`UNCATEGORIZED`].
    pub fn hierarchy_path(&self) -> String {
        let levels: Vec<&str> = self.levels().iter().filter_map(non_empty).collect();
        if !levels.is_empty() {
            return levels.join(PATH_SEPARATOR);
        }

        let fallback: Vec<&str> = [
            self.category.as_deref(),
            self.author.as_deref(),
            self.title.as_deref(),
        ]
        .iter()
        .filter_map(non_empty)
        .collect();

        if fallback.is_empty() {
            UNCATEGORIZED.to_string()
        } else {
            fallback.join(PATH_SEPARATOR)
        }
    }

    /// Look up a field by name, well-known fields first.
    pub fn field(&self, key: &str) -> Option<Value> {
        let known = match key {
            "title" => &self.title,
            "author" => &self.author,
            "category" => &self.category,
            "level_1" => &self.level_1,
            "level_2" => &self.level_2,
            "level_3" => &self.level_3,
            "level_4" => &self.level_4,
            "level_5" => &self.level_5,
            "level_6" => &self.level_6,
            "tags" => {
                return Some(Value::Array(
                    self.tags.iter().cloned().map(Value::String).collect(),
                ));
            }
            _ => return self.extra.get(key).cloned(),
        };
        known.clone().map(Value::String)
    }

    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|tag| self.tags.contains(tag))
    }
}

/// A document as persisted in the metadata store.
///
/// `doc_id` is the store's primary key. Documents are never deleted here;
/// removal happens through bulk tag operations against the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", alias = "doc_id")]
    pub doc_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Document {
    pub fn create(input: NewDocument, now: DateTime<Utc>) -> Self {
        Self {
            content_hash: hash_content(&input.content),
            doc_id: input.doc_id,
            content: input.content,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Apply a re-ingest of the same `doc_id`.
    ///
    /// Returns whether the content changed. Metadata is always replaced and
    /// `updated_at` always refreshed; `version` only moves when the hash does.
    pub fn reingest(&mut self, input: NewDocument, now: DateTime<Utc>) -> bool {
        let hash = hash_content(&input.content);
        let changed = hash != self.content_hash;
        if changed {
            self.version += 1;
            self.content_hash = hash;
            self.content = input.content;
        }
        self.metadata = input.metadata;
        self.updated_at = now.max(self.updated_at);
        changed
    }

    pub fn preview(&self) -> String {
        preview(&self.content)
    }

    /// Stable vector id for this document (Qdrant only accepts UUID or integer ids)
    pub fn vector_id(&self) -> Uuid {
        vector_id_for(&self.doc_id)
    }
}

/// Ingest input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewDocument {
    #[validate(length(min = 1, message = "doc_id must not be empty"))]
    pub doc_id: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// Outcome of an ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub doc_id: String,
    pub version: i64,
    pub content_hash: String,
    pub changed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestOutcome {
    pub fn new(document: &Document, changed: bool) -> Self {
        Self {
            doc_id: document.doc_id.clone(),
            version: document.version,
            content_hash: document.content_hash.clone(),
            changed,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// A point handed to the vector database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector_id: Uuid,
    pub doc_id: String,
    pub embedding: Vec<f32>,
    pub payload: Value,
}

impl VectorRecord {
    /// Build the record for a document; the payload carries what search-time
    /// filtering needs.
    pub fn for_document(document: &Document, embedding: Vec<f32>) -> Self {
        let meta = &document.metadata;
        let mut payload = Map::new();
        payload.insert("doc_id".into(), Value::String(document.doc_id.clone()));
        payload.insert("version".into(), Value::from(document.version));
        payload.insert(
            "tags".into(),
            Value::Array(meta.tags.iter().cloned().map(Value::String).collect()),
        );
        for (key, value) in [
            ("title", &meta.title),
            ("author", &meta.author),
            ("category", &meta.category),
            ("level_1", &meta.level_1),
            ("level_2", &meta.level_2),
            ("level_3", &meta.level_3),
            ("level_4", &meta.level_4),
            ("level_5", &meta.level_5),
            ("level_6", &meta.level_6),
        ] {
            if let Some(v) = value {
                payload.insert(key.into(), Value::String(v.clone()));
            }
        }
        payload.insert("content_preview".into(), Value::String(document.preview()));

        Self {
            vector_id: document.vector_id(),
            doc_id: document.doc_id.clone(),
            embedding,
            payload: Value::Object(payload),
        }
    }
}

/// Vectorize input: an ingest plus tagging options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VectorizeRequest {
    #[validate(length(min = 1, message = "doc_id must not be empty"))]
    pub doc_id: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    /// Extra tag added to the document's tags
    #[serde(default)]
    pub tag: Option<String>,
    /// Derive tags from category, level_1 and author
    #[serde(default)]
    pub enable_auto_tagging: bool,
}

impl VectorizeRequest {
    /// Fold the tagging options into the metadata
    pub fn into_new_document(self) -> NewDocument {
        let mut metadata = self.metadata;

        if let Some(tag) = self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            metadata.tags.insert(tag.to_string());
        }

        if self.enable_auto_tagging {
            let derived: Vec<String> = [
                metadata.category.as_deref(),
                metadata.level_1.as_deref(),
                metadata.author.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(slugify)
            .filter(|slug| !slug.is_empty())
            .collect();
            metadata.tags.extend(derived);
        }

        NewDocument {
            doc_id: self.doc_id,
            content: self.content,
            metadata,
        }
    }
}

/// Outcome of a vectorize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizeOutcome {
    pub doc_id: String,
    pub vector_id: Uuid,
    pub version: i64,
    pub content_hash: String,
    pub changed: bool,
    pub tags: BTreeSet<String>,
}

impl VectorizeOutcome {
    pub fn new(document: &Document, changed: bool) -> Self {
        Self {
            doc_id: document.doc_id.clone(),
            vector_id: document.vector_id(),
            version: document.version,
            content_hash: document.content_hash.clone(),
            changed,
            tags: document.metadata.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchVectorizeRequest {
    pub documents: Vec<VectorizeRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
}

/// Per-document result inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    pub doc_id: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl BatchItemOutcome {
    pub fn success(doc_id: String, version: i64) -> Self {
        Self {
            doc_id,
            status: ItemStatus::Success,
            error: None,
            version: Some(version),
        }
    }

    pub fn failed(doc_id: String, error: impl ToString) -> Self {
        Self {
            doc_id,
            status: ItemStatus::Failed,
            error: Some(error.to_string()),
            version: None,
        }
    }
}

/// Batch results in input order, plus totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<BatchItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn new(results: Vec<BatchItemOutcome>) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.status == ItemStatus::Success)
            .count();
        Self {
            failed: results.len() - succeeded,
            succeeded,
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteByTagRequest {
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub tag: String,
    pub deleted_count: u64,
}

/// Lowercase, with every run of non-alphanumerics collapsed to a single `-`
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn non_empty<'a>(value: &Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Lowercase hex SHA-256 of the content
pub fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn vector_id_for(doc_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes())
}

/// First [`PREVIEW_CHARS`] characters, cut on a char boundary
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

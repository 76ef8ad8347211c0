use async_trait::async_trait;

use crate::error::RagResult;

/// Trait for embedding generation providers
///
/// One call produces one fixed-length vector. Implementations must not retry
/// internally; [`crate::embedding::EmbeddingClient`] adds throttling and caching on top.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, used in cache keys
    fn model(&self) -> String;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;
}

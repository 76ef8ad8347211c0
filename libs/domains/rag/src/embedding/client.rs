use std::sync::Arc;

use tracing::{instrument, trace};

use super::EmbeddingProvider;
use crate::cache::{CacheConfig, CacheStats, TtlLruCache};
use crate::error::{RagError, RagResult};
use crate::rate_limiter::RateLimiter;

/// Throttled, optionally cached access to an [`EmbeddingProvider`].
///
/// Every provider call waits on the shared [`RateLimiter`] first. Cache hits
/// skip both the limiter and the provider. Failures are returned as-is; the
/// caller decides whether to retry.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    cache: Option<TtlLruCache<Vec<f32>>>,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            provider,
            limiter,
            cache: None,
        }
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(TtlLruCache::new(config));
        self
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model(&self) -> String {
        self.provider.model()
    }

    fn cache_key(&self, text: &str) -> String {
        format!("{}:{}", self.provider.model(), text)
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::Validation(
                "Cannot embed empty text".to_string(),
            ));
        }

        let key = self.cache_key(text);
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            trace!("Embedding cache hit");
            return Ok(cached);
        }

        self.limiter.wait().await;
        let embedding = self.provider.embed(text).await?;

        let expected = self.provider.dimension();
        if embedding.len() != expected {
            return Err(RagError::Embedding(format!(
                "Expected {} dimensions, provider returned {}",
                expected,
                embedding.len()
            )));
        }

        if let Some(cache) = &self.cache {
            cache.put(key, embedding.clone());
        }

        Ok(embedding)
    }

    /// Drop expired cached embeddings; returns how many were removed
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

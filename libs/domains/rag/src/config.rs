use std::time::Duration;

use core_config::{ConfigError, FromEnv, env_duration_ms, env_duration_secs, env_parse};

use crate::cache::CacheConfig;
use crate::metadata::EnrichmentConfig;
use crate::retry::RetryPolicy;

/// Tuning knobs for the retrieval core
#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    /// Minimum spacing between embedding provider calls
    pub embedding_rate_limit: Duration,
    pub retry: RetryPolicy,
    pub enrichment: EnrichmentConfig,
    pub result_cache: CacheConfig,
    pub embedding_cache: CacheConfig,
    pub dispatch_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_rate_limit: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            enrichment: EnrichmentConfig::default(),
            result_cache: CacheConfig::new(256, Duration::from_secs(300)),
            embedding_cache: CacheConfig::new(1024, Duration::from_secs(3600)),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

impl FromEnv for RagConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let retry = RetryPolicy::new()
            .with_max_attempts(env_parse("VECTOR_RETRY_ATTEMPTS", 3)?)
            .with_base_delay(env_duration_ms("VECTOR_RETRY_BASE_MS", 500)?);

        Ok(Self {
            embedding_rate_limit: env_duration_ms("EMBEDDING_RATE_LIMIT_MS", 100)?,
            retry,
            enrichment: EnrichmentConfig {
                item_timeout: env_duration_ms("METADATA_FETCH_TIMEOUT_MS", 250)?,
                bulk_timeout: env_duration_ms("METADATA_BULK_TIMEOUT_MS", 1000)?,
            },
            result_cache: CacheConfig::new(
                env_parse("RESULT_CACHE_MAX_SIZE", 256)?,
                env_duration_secs("RESULT_CACHE_TTL_SECS", 300)?,
            ),
            embedding_cache: CacheConfig::new(
                env_parse("EMBEDDING_CACHE_MAX_SIZE", 1024)?,
                env_duration_secs("EMBEDDING_CACHE_TTL_SECS", 3600)?,
            ),
            dispatch_timeout: env_duration_ms("DISPATCH_TIMEOUT_MS", 10_000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 11] = [
        "EMBEDDING_RATE_LIMIT_MS",
        "VECTOR_RETRY_ATTEMPTS",
        "VECTOR_RETRY_BASE_MS",
        "METADATA_FETCH_TIMEOUT_MS",
        "METADATA_BULK_TIMEOUT_MS",
        "RESULT_CACHE_MAX_SIZE",
        "RESULT_CACHE_TTL_SECS",
        "EMBEDDING_CACHE_MAX_SIZE",
        "EMBEDDING_CACHE_TTL_SECS",
        "DISPATCH_TIMEOUT_MS",
        "APP_ENV",
    ];

    #[test]
    fn test_defaults_when_unset() {
        temp_env::with_vars_unset(VARS, || {
            let config = RagConfig::from_env().unwrap();
            assert_eq!(config, RagConfig::default());
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("EMBEDDING_RATE_LIMIT_MS", Some("250")),
                ("VECTOR_RETRY_ATTEMPTS", Some("2")),
                ("VECTOR_RETRY_BASE_MS", Some("1000")),
                ("METADATA_FETCH_TIMEOUT_MS", Some("150")),
                ("RESULT_CACHE_MAX_SIZE", Some("10")),
                ("EMBEDDING_CACHE_TTL_SECS", Some("60")),
                ("DISPATCH_TIMEOUT_MS", Some("500")),
            ],
            || {
                let config = RagConfig::from_env().unwrap();
                assert_eq!(config.embedding_rate_limit, Duration::from_millis(250));
                assert_eq!(config.retry.max_attempts, 2);
                assert_eq!(config.retry.base_delay, Duration::from_secs(1));
                assert_eq!(config.enrichment.item_timeout, Duration::from_millis(150));
                assert_eq!(config.result_cache.max_size, 10);
                assert_eq!(config.embedding_cache.ttl, Duration::from_secs(60));
                assert_eq!(config.dispatch_timeout, Duration::from_millis(500));
            },
        );
    }

    #[test]
    fn test_malformed_value_is_error() {
        temp_env::with_var("RESULT_CACHE_MAX_SIZE", Some("lots"), || {
            let err = RagConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("RESULT_CACHE_MAX_SIZE"));
        });
    }
}

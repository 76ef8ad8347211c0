use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Upstream error: {0}")]
    Fatal(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<RagError>,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RagResult<T> = Result<T, RagError>;

/// Coarse error class reported in tool envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UpstreamTransient,
    UpstreamFatal,
    Timeout,
    RetryExhausted,
    Internal,
}

impl RagError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::RateLimited(_) | RagError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Validation(_) => ErrorKind::Validation,
            RagError::RateLimited(_) | RagError::Transient(_) => ErrorKind::UpstreamTransient,
            RagError::NotFound(_) | RagError::Fatal(_) | RagError::Embedding(_) => {
                ErrorKind::UpstreamFatal
            }
            RagError::Timeout(_) => ErrorKind::Timeout,
            RagError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            RagError::Config(_) | RagError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Classify an HTTP status returned by an upstream service.
    pub fn from_http_status(status: u16, message: String) -> Self {
        match status {
            429 => RagError::RateLimited(message),
            408 | 500 | 502 | 503 | 504 => RagError::Transient(message),
            400 | 422 => RagError::Validation(message),
            404 => RagError::NotFound(message),
            _ => RagError::Fatal(message),
        }
    }

    /// Classify an upstream failure from its message when no structured code exists.
    pub fn from_upstream_message(message: String) -> Self {
        let lower = message.to_lowercase();
        if ["rate limit", "too many requests", "resource exhausted", "429"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            RagError::RateLimited(message)
        } else if [
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "broken pipe",
            "unavailable",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
        {
            RagError::Transient(message)
        } else {
            RagError::Fatal(message)
        }
    }
}

impl From<qdrant_client::QdrantError> for RagError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        let message = err.to_string();
        match &err {
            // gRPC status codes: 3 InvalidArgument, 4 DeadlineExceeded, 5 NotFound,
            // 8 ResourceExhausted, 10 Aborted, 14 Unavailable
            qdrant_client::QdrantError::ResponseError { status } => match status.code() as i32 {
                8 => RagError::RateLimited(message),
                4 | 10 | 14 => RagError::Transient(message),
                3 => RagError::Validation(message),
                5 => RagError::NotFound(message),
                _ => RagError::Fatal(message),
            },
            _ => RagError::from_upstream_message(message),
        }
    }
}

impl From<mongodb::error::Error> for RagError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind as MongoErrorKind;

        let message = format!("MongoDB error: {}", err);
        match *err.kind {
            MongoErrorKind::Io(_) | MongoErrorKind::ServerSelection { .. } => {
                RagError::Transient(message)
            }
            _ => RagError::from_upstream_message(message),
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return RagError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) => RagError::from_http_status(status.as_u16(), err.to_string()),
            None => RagError::Embedding(err.to_string()),
        }
    }
}

impl From<core_config::ConfigError> for RagError {
    fn from(err: core_config::ConfigError) -> Self {
        RagError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Internal(format!("JSON error: {}", err))
    }
}

impl From<validator::ValidationErrors> for RagError {
    fn from(err: validator::ValidationErrors) -> Self {
        RagError::Validation(err.to_string())
    }
}

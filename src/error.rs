//! Error types for the embedding index
//!
//! Each concern has its own enum so callers can decide how far a failure
//! reaches: configuration errors block startup, provider and storage errors
//! are scoped to one note, index errors only mark a record as stale.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias for session-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("model `{model}` requires a provider credential")]
    MissingCredential { model: String },

    #[error("no embedding model configured")]
    MissingModelId,

    #[error("unknown dimensions for model `{0}`; set `dimensions` in the config")]
    UnknownDimensions(String),

    #[error("unknown local model `{0}`; the built-in local model is `htp-384`")]
    UnknownLocalModel(String),

    #[error("topK must be between 1 and {max}, got {value}")]
    TopKOutOfRange { value: usize, max: usize },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },

    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure reported by an embedding provider
///
/// The provider never retries; `is_transient` tells the index manager whether
/// another attempt may succeed.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ProviderError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    /// Provider-supplied hint for the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Failure reading or writing persisted records
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize record for {path}: {source}")]
    Serialize {
        path: String,
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A stored record that cannot be used with the active model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("{path}: vector has {actual} dimensions, active model expects {expected}")]
    DimensionMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("{path}: embedded with `{found}`, active model is `{expected}`")]
    ModelMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

/// Top-level error for session operations
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to read notes: {0}")]
    Source(#[from] std::io::Error),
}

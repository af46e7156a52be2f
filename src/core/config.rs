//! Persisted plugin settings
//!
//! Stored as a camelCase JSON document at `.embeddings/config.json`. A
//! missing file yields the defaults; validation happens separately so a
//! freshly written config can be inspected before it is used.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::search::embedding::{known_dimensions, HTP_MODEL_ID};

pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_MODEL_ID: &str = "text-embedding-3-small";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// When notes are (re)embedded without an explicit command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshPolicy {
    /// Only on explicit reindex or embed commands
    #[default]
    Manual,
    /// On every content modification
    Always,
    /// Only when a note is created
    OnNewNote,
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Always => "always",
            Self::OnNewNote => "onNewNote",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreBackend {
    /// One JSON file per note
    #[default]
    Files,
    Sqlite,
}

/// Which provider variant serves a model id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Local,
}

impl ProviderKind {
    pub fn for_model(model_id: &str) -> Self {
        if model_id.starts_with("htp") {
            Self::Local
        } else {
            Self::OpenAi
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider_credential: String,
    pub refresh_policy: RefreshPolicy,
    pub exclusions: Vec<String>,
    pub top_k: usize,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_input_chars: usize,
    pub store_backend: StoreBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_credential: String::new(),
            refresh_policy: RefreshPolicy::Manual,
            exclusions: Vec::new(),
            top_k: 10,
            model_id: DEFAULT_MODEL_ID.to_string(),
            base_url: None,
            dimensions: None,
            concurrency: 1,
            max_retries: 3,
            retry_delay_ms: 500,
            max_input_chars: 8000,
            store_backend: StoreBackend::Files,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credential = if self.provider_credential.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Config")
            .field("provider_credential", &credential)
            .field("refresh_policy", &self.refresh_policy)
            .field("exclusions", &self.exclusions)
            .field("top_k", &self.top_k)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .field("dimensions", &self.dimensions)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_input_chars", &self.max_input_chars)
            .field("store_backend", &self.store_backend)
            .finish()
    }
}

impl Config {
    /// Config using the local harmonic projection model (no credential needed)
    pub fn local() -> Self {
        Self {
            model_id: HTP_MODEL_ID.to_string(),
            ..Self::default()
        }
    }

    /// Load from disk; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        std::fs::write(path, json).map_err(write_err)
    }

    /// Check everything a reindex needs before it starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = self.model_id.trim();
        if model.is_empty() {
            return Err(ConfigError::MissingModelId);
        }
        match ProviderKind::for_model(model) {
            ProviderKind::Local if model != HTP_MODEL_ID => {
                return Err(ConfigError::UnknownLocalModel(model.to_string()));
            }
            ProviderKind::OpenAi if self.provider_credential.trim().is_empty() => {
                return Err(ConfigError::MissingCredential {
                    model: model.to_string(),
                });
            }
            _ => {}
        }
        self.embedding_dimensions()?;
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(ConfigError::TopKOutOfRange {
                value: self.top_k,
                max: MAX_TOP_K,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "concurrency",
            });
        }
        if self.max_input_chars == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxInputChars",
            });
        }
        Ok(())
    }

    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::for_model(self.model_id.trim())
    }

    /// Vector length mandated by the configured model
    pub fn embedding_dimensions(&self) -> Result<usize, ConfigError> {
        let model = self.model_id.trim();
        match self.dimensions.or_else(|| known_dimensions(model)) {
            Some(0) | None => Err(ConfigError::UnknownDimensions(model.to_string())),
            Some(dims) => Ok(dims),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

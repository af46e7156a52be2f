//! Vector record storage
//!
//! One `EmbeddingRecord` per note path. Backends must make `put` atomic with
//! respect to readers and must report unreadable records as absent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, StorageError};

/// Embedding of one note as produced by one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub path: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Whether this record can be ranked against vectors from `model_id`
    pub fn check_compatible(&self, model_id: &str, dimensions: usize) -> Result<(), IndexError> {
        if self.model_id != model_id {
            return Err(IndexError::ModelMismatch {
                path: self.path.clone(),
                expected: model_id.to_string(),
                found: self.model_id.clone(),
            });
        }
        if self.vector.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                path: self.path.clone(),
                expected: dimensions,
                actual: self.vector.len(),
            });
        }
        Ok(())
    }

    /// Up to date for this content under this model
    pub fn is_current(&self, content_hash: &str, model_id: &str, dimensions: usize) -> bool {
        self.content_hash == content_hash && self.check_compatible(model_id, dimensions).is_ok()
    }
}

/// Records as they were when `list_all` was called
///
/// Cheap to clone; iterate it as many times as needed.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    records: Arc<[EmbeddingRecord]>,
}

impl RecordSnapshot {
    pub fn new(mut records: Vec<EmbeddingRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            records: records.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(path, record)` pairs in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EmbeddingRecord)> + '_ {
        self.records.iter().map(|r| (r.path.as_str(), r))
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a RecordSnapshot {
    type Item = &'a EmbeddingRecord;
    type IntoIter = std::slice::Iter<'a, EmbeddingRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Stored record for a path; `None` when missing or unreadable
    async fn get(&self, path: &str) -> Result<Option<EmbeddingRecord>, StorageError>;

    /// Insert or replace the record keyed by `record.path`
    async fn put(&self, record: &EmbeddingRecord) -> Result<(), StorageError>;

    /// Remove a record; missing paths are not an error
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn list_all(&self) -> Result<RecordSnapshot, StorageError>;

    /// Drop every record (explicit full rebuild)
    async fn clear(&self) -> Result<(), StorageError>;
}

//! One JSON file per note under `.embeddings/records/`
//!
//! File names are derived from the note path with a reversible hex encoding
//! (`p-<hex>.json`); paths whose encoding would exceed a safe file name
//! length fall back to `h-<sha256>.json`. The record itself carries the path
//! so both forms round-trip. Writes go to a temporary sibling and are
//! renamed into place, so readers never see a partial vector.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::store::{EmbeddingRecord, RecordSnapshot, RecordStore};
use crate::error::StorageError;

const RECORD_EXT: &str = "json";
const TMP_EXT: &str = "tmp";
const MAX_HEX_KEY: usize = 200;

/// Storage key for a note path
pub fn encode_key(path: &str) -> String {
    let hex: String = path.bytes().map(|b| format!("{b:02x}")).collect();
    if hex.len() <= MAX_HEX_KEY {
        format!("p-{hex}")
    } else {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        format!("h-{:x}", hasher.finalize())
    }
}

/// Note path for a hex key; `None` for hashed or invalid keys
pub fn decode_key(key: &str) -> Option<String> {
    let hex = key.strip_prefix("p-")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// On-disk forms accepted when reading
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Full(EmbeddingRecord),
    /// Bare JSON array of numbers, no metadata
    Vector(Vec<f32>),
}

pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_file(&self, path: &str) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", encode_key(path)))
    }

    /// Parse one record file; corrupt content is reported as `None`
    async fn read_record(
        &self,
        file: &Path,
        expected_path: Option<&str>,
    ) -> Result<Option<EmbeddingRecord>, StorageError> {
        let raw = match tokio::fs::read(file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(file, e)),
        };

        let record = match serde_json::from_slice::<StoredRecord>(&raw) {
            Ok(StoredRecord::Full(record)) => record,
            Ok(StoredRecord::Vector(vector)) => {
                let key = file.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                let Some(path) = decode_key(key) else {
                    warn!(file = %file.display(), "bare vector record with undecodable name, ignoring");
                    return Ok(None);
                };
                let updated_at = tokio::fs::metadata(file)
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                EmbeddingRecord {
                    path,
                    vector,
                    model_id: String::new(),
                    content_hash: String::new(),
                    updated_at,
                }
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "corrupt embedding record, treating as absent");
                return Ok(None);
            }
        };

        if let Some(expected) = expected_path {
            if record.path != expected {
                warn!(
                    file = %file.display(),
                    expected,
                    found = %record.path,
                    "record belongs to another path, treating as absent"
                );
                return Ok(None);
            }
        }

        Ok(Some(record))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, path: &str) -> Result<Option<EmbeddingRecord>, StorageError> {
        self.read_record(&self.record_file(path), Some(path)).await
    }

    async fn put(&self, record: &EmbeddingRecord) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let json = serde_json::to_vec(record).map_err(|source| StorageError::Serialize {
            path: record.path.clone(),
            source,
        })?;

        let target = self.record_file(&record.path);
        let tmp = target.with_extension(TMP_EXT);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(&target, e));
        }

        debug!(path = %record.path, file = %target.display(), "stored embedding");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let file = self.record_file(path);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(file, e)),
        }
    }

    async fn list_all(&self) -> Result<RecordSnapshot, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecordSnapshot::empty()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "stopped reading records directory");
                    break;
                }
            };
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match self.read_record(&file, None).await {
                // a record stored under another path's key is unreachable through `get`
                Ok(Some(record)) if self.record_file(&record.path) == file => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "unreadable embedding record, skipping"),
            }
        }

        Ok(RecordSnapshot::new(records))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&self.dir, e)),
        }
    }
}

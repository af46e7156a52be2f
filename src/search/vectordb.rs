//! Vector database using SQLite
//!
//! Stores embeddings as little-endian f32 BLOBs, one row per note path.
//! Similarity is computed in Rust by the query engine.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::store::{EmbeddingRecord, RecordSnapshot, RecordStore};
use crate::error::StorageError;

/// Vector database for note embeddings
pub struct VectorDB {
    conn: Arc<Mutex<Connection>>,
}

/// Row as read from the `embeddings` table
struct RawRow {
    path: String,
    model_id: String,
    content_hash: String,
    vector: Vec<u8>,
    updated_at: i64,
}

impl VectorDB {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            path TEXT PRIMARY KEY,
            model_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            vector BLOB NOT NULL,
            updated_at INTEGER NOT NULL  -- unix millis
        );

        CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_id);
        "#,
    )?;
    Ok(())
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        path: row.get(0)?,
        model_id: row.get(1)?,
        content_hash: row.get(2)?,
        vector: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl RawRow {
    /// Decode into a record; malformed rows are logged and dropped
    fn into_record(self) -> Option<EmbeddingRecord> {
        let Some(vector) = blob_to_embedding(&self.vector) else {
            warn!(path = %self.path, bytes = self.vector.len(), "corrupt embedding blob, treating as absent");
            return None;
        };
        let Some(updated_at) = DateTime::<Utc>::from_timestamp_millis(self.updated_at) else {
            warn!(path = %self.path, "invalid timestamp, treating as absent");
            return None;
        };
        Some(EmbeddingRecord {
            path: self.path,
            vector,
            model_id: self.model_id,
            content_hash: self.content_hash,
            updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT path, model_id, content_hash, vector, updated_at FROM embeddings";

#[async_trait]
impl RecordStore for VectorDB {
    async fn get(&self, path: &str) -> Result<Option<EmbeddingRecord>, StorageError> {
        let path = path.to_string();
        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE path = ?1"),
                        params![path],
                        read_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(row.and_then(RawRow::into_record))
    }

    async fn put(&self, record: &EmbeddingRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO embeddings (path, model_id, content_hash, vector, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(path) DO UPDATE SET
                    model_id = excluded.model_id,
                    content_hash = excluded.content_hash,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.path,
                    record.model_id,
                    record.content_hash,
                    embedding_to_blob(&record.vector),
                    record.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM embeddings WHERE path = ?1", params![path])?;
            Ok(())
        })
        .await
    }

    async fn list_all(&self) -> Result<RecordSnapshot, StorageError> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(SELECT_COLUMNS)?;
                let rows = stmt.query_map([], read_row)?;
                let mut result = Vec::new();
                for row in rows {
                    result.push(row?);
                }
                Ok(result)
            })
            .await?;

        Ok(RecordSnapshot::new(
            rows.into_iter().filter_map(RawRow::into_record).collect(),
        ))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM embeddings", [])?;
            Ok(())
        })
        .await
    }
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding; `None` unless the length is a multiple of 4
fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

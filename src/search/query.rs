//! Similarity queries over the record store
//!
//! Exact linear scan: every candidate compatible with the active model is
//! scored by cosine similarity, ties broken by path.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::embedding::cosine_similarity;
use super::store::{EmbeddingRecord, RecordStore};
use crate::core::config::MAX_TOP_K;
use crate::core::paths::{normalize_note_path, Exclusions};

/// What to find neighbours of
#[derive(Debug, Clone, Copy)]
pub enum QueryTarget<'a> {
    /// A note already in the index
    Note(&'a str),
    /// An arbitrary vector from the active model
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarNote {
    pub path: String,
    pub score: f32,
}

/// Ranked matches plus a notice when the result is degraded
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResults {
    pub matches: Vec<SimilarNote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl QueryResults {
    fn degraded(warning: String) -> Self {
        Self {
            matches: Vec::new(),
            warning: Some(warning),
        }
    }
}

pub fn clamp_top_k(k: usize) -> usize {
    k.clamp(1, MAX_TOP_K)
}

/// Rank `candidates` against `query`
///
/// Skips `exclude_path`, excluded paths, records from other models and
/// vectors of another length. Returns at most `k` (clamped to 1..=100)
/// matches, best first, ties by ascending path.
pub fn rank<'a, I>(
    query: &[f32],
    candidates: I,
    model_id: &str,
    exclude_path: Option<&str>,
    exclusions: &Exclusions,
    k: usize,
) -> Vec<SimilarNote>
where
    I: IntoIterator<Item = &'a EmbeddingRecord>,
{
    let mut scored: Vec<SimilarNote> = candidates
        .into_iter()
        .filter(|r| Some(r.path.as_str()) != exclude_path)
        .filter(|r| !exclusions.is_excluded(&r.path))
        .filter(|r| match r.check_compatible(model_id, query.len()) {
            Ok(()) => true,
            Err(stale) => {
                debug!(error = %stale, "skipping stale record");
                false
            }
        })
        .filter_map(|r| {
            let score = cosine_similarity(query, &r.vector);
            score.is_finite().then(|| SimilarNote {
                path: r.path.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    scored.truncate(clamp_top_k(k));
    scored
}

/// Read-only view of the index for one model
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    exclusions: Exclusions,
    model_id: String,
    dimensions: usize,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        exclusions: Exclusions,
        model_id: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            store,
            exclusions,
            model_id: model_id.into(),
            dimensions,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn query(&self, target: QueryTarget<'_>, k: usize) -> QueryResults {
        match target {
            QueryTarget::Vector(vector) => self.rank_snapshot(vector, None, k).await,
            QueryTarget::Note(path) => self.query_note(&normalize_note_path(path), k).await,
        }
    }

    async fn query_note(&self, path: &str, k: usize) -> QueryResults {
        let record = match self.store.get(path).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return QueryResults::degraded(format!("{path} has no embedding yet"));
            }
            Err(e) => {
                warn!(path, error = %e, "failed to read query note embedding");
                return QueryResults::degraded(format!("could not read embedding for {path}: {e}"));
            }
        };

        if let Err(stale) = record.check_compatible(&self.model_id, self.dimensions) {
            debug!(error = %stale, "query note is stale");
            return QueryResults::degraded(format!("{path} is not embedded with {}", self.model_id));
        }

        self.rank_snapshot(&record.vector, Some(path), k).await
    }

    async fn rank_snapshot(&self, query: &[f32], exclude: Option<&str>, k: usize) -> QueryResults {
        match self.store.list_all().await {
            Ok(snapshot) => QueryResults {
                matches: rank(query, &snapshot, &self.model_id, exclude, &self.exclusions, k),
                warning: None,
            },
            Err(e) => {
                warn!(error = %e, "failed to enumerate embeddings");
                QueryResults::degraded(format!("could not read the embedding index: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::search::file_store::FileRecordStore;
    use crate::search::store::RecordSnapshot;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(path: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            path: path.into(),
            vector,
            model_id: "mock".into(),
            content_hash: "h".into(),
            updated_at: Utc::now(),
        }
    }

    fn paths(matches: &[SimilarNote]) -> Vec<&str> {
        matches.iter().map(|m| m.path.as_str()).collect()
    }

    async fn engine_with(records: Vec<EmbeddingRecord>) -> (QueryEngine, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = FileRecordStore::new(tmp.path());
        for rec in &records {
            store.put(rec).await.unwrap();
        }
        let engine = QueryEngine::new(Arc::new(store), Exclusions::default(), "mock", 2);
        (engine, tmp)
    }

    #[tokio::test]
    async fn test_query_by_note_scenario() {
        let (engine, _tmp) = engine_with(vec![
            record("A", vec![1.0, 0.0]),
            record("B", vec![1.0, 0.0]),
            record("C", vec![0.0, 1.0]),
        ])
        .await;

        let results = engine.query(QueryTarget::Note("A"), 2).await;
        assert_eq!(
            results.matches,
            vec![
                SimilarNote { path: "B".into(), score: 1.0 },
                SimilarNote { path: "C".into(), score: 0.0 },
            ]
        );
        assert!(results.warning.is_none());
    }

    #[tokio::test]
    async fn test_ties_sorted_by_path() {
        let (engine, _tmp) = engine_with(vec![
            record("A", vec![1.0, 0.0]),
            record("D", vec![2.0, 0.0]),
            record("B", vec![1.0, 0.0]),
            record("C", vec![0.0, 1.0]),
        ])
        .await;

        let results = engine.query(QueryTarget::Note("A"), 10).await;
        assert_eq!(paths(&results.matches), vec!["B", "D", "C"]);
    }

    #[tokio::test]
    async fn test_empty_store_is_empty_result() {
        let (engine, _tmp) = engine_with(Vec::new()).await;
        let results = engine.query(QueryTarget::Note("anything.md"), 10).await;
        assert!(results.matches.is_empty());

        let results = engine.query(QueryTarget::Vector(&[1.0, 0.0]), 10).await;
        assert!(results.matches.is_empty());
        assert!(results.warning.is_none());
    }

    #[test]
    fn test_rank_properties() {
        let records: Vec<EmbeddingRecord> = (0..30)
            .map(|i| {
                let angle = i as f32 * 0.1;
                record(&format!("n{i:02}.md"), vec![angle.cos(), angle.sin()])
            })
            .collect();
        let query = records[5].vector.clone();

        for k in [1, 3, 10, 200] {
            let ranked = rank(&query, &records, "mock", Some("n05.md"), &Exclusions::default(), k);
            assert!(ranked.len() <= clamp_top_k(k));
            assert!(ranked.iter().all(|m| m.path != "n05.md"));
            assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn test_rank_filters_stale_and_excluded() {
        let mut other_model = record("other-model.md", vec![1.0, 0.0]);
        other_model.model_id = "old".into();
        let records = vec![
            record("keep.md", vec![1.0, 0.1]),
            record("wrong-dims.md", vec![1.0, 0.0, 0.0]),
            other_model,
            record("Templates/t.md", vec![1.0, 0.0]),
            record("zero.md", vec![0.0, 0.0]),
        ];

        let ranked = rank(
            &[1.0, 0.0],
            &records,
            "mock",
            None,
            &Exclusions::new(["Templates"]),
            10,
        );
        assert_eq!(paths(&ranked), vec!["keep.md", "zero.md"]);
        assert_eq!(ranked[1].score, 0.0);
    }

    #[test]
    fn test_k_is_clamped() {
        assert_eq!(clamp_top_k(0), 1);
        assert_eq!(clamp_top_k(50), 50);
        assert_eq!(clamp_top_k(1000), 100);

        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![0.5, 0.5])];
        assert_eq!(rank(&[1.0, 0.0], &records, "mock", None, &Exclusions::default(), 0).len(), 1);
    }

    #[tokio::test]
    async fn test_query_note_without_record_warns() {
        let (engine, _tmp) = engine_with(vec![record("A", vec![1.0, 0.0])]).await;
        let results = engine.query(QueryTarget::Note("missing.md"), 5).await;
        assert!(results.matches.is_empty());
        assert!(results.warning.is_some());
    }

    #[tokio::test]
    async fn test_query_note_normalizes_path() {
        let (engine, _tmp) = engine_with(vec![
            record("Notes/a.md", vec![1.0, 0.0]),
            record("Notes/b.md", vec![0.6, 0.8]),
        ])
        .await;
        let results = engine.query(QueryTarget::Note("/Notes//a.md"), 5).await;
        assert_eq!(paths(&results.matches), vec!["Notes/b.md"]);
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn get(&self, _path: &str) -> Result<Option<EmbeddingRecord>, StorageError> {
            Ok(None)
        }
        async fn put(&self, _record: &EmbeddingRecord) -> Result<(), StorageError> {
            Ok(())
        }
        async fn delete(&self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn list_all(&self) -> Result<RecordSnapshot, StorageError> {
            Err(StorageError::io(
                "/broken",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
        }
        async fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enumeration_failure_degrades() {
        let engine = QueryEngine::new(Arc::new(BrokenStore), Exclusions::default(), "mock", 2);
        let results = engine.query(QueryTarget::Vector(&[1.0, 0.0]), 5).await;
        assert!(results.matches.is_empty());
        assert!(results.warning.unwrap().contains("denied"));
    }
}

//! Vault session: owns the store, provider, index manager and query engine
//!
//! All mutation goes through one writer lock, so passes, single-note
//! refreshes and deletions never interleave. Queries only read and run
//! concurrently with a pass.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{Config, ProviderKind, RefreshPolicy, StoreBackend};
use crate::core::note::{content_hash, NoteSource, VaultNotes};
use crate::core::paths::{normalize_note_path, Exclusions, VaultPaths};
use crate::error::{ConfigError, IndexError, Result};
use crate::search::embedding::{EmbeddingProvider, HtpEmbedder};
use crate::search::file_store::FileRecordStore;
use crate::search::indexer::{IndexManager, IndexSettings, NoteOutcome, NoteState, ReindexReport};
use crate::search::openai::OpenAiProvider;
use crate::search::query::{QueryEngine, QueryResults, QueryTarget};
use crate::search::store::{EmbeddingRecord, RecordStore};
use crate::search::vectordb::VectorDB;

/// Builds the provider for a validated config
pub type ProviderFactory =
    Arc<dyn Fn(&Config) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// Provider selected by the model id prefix
pub fn build_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider_kind() {
        ProviderKind::Local => Ok(Arc::new(HtpEmbedder::new())),
        ProviderKind::OpenAi => {
            let provider = OpenAiProvider::new(
                config.provider_credential.trim().to_string(),
                config.model_id.trim().to_string(),
                config.embedding_dimensions()?,
            )?
            .with_base_url(config.base_url());
            Ok(Arc::new(provider))
        }
    }
}

pub fn open_store(paths: &VaultPaths, backend: StoreBackend) -> Result<Arc<dyn RecordStore>> {
    Ok(match backend {
        StoreBackend::Files => Arc::new(FileRecordStore::new(&paths.records)),
        StoreBackend::Sqlite => Arc::new(VectorDB::open(&paths.database)?),
    })
}

/// Stored embedding of one note as seen by the active model
#[derive(Debug, Clone)]
pub enum LoadedEmbedding {
    Found(EmbeddingRecord),
    /// Present but produced by another model or with another size
    Stale(EmbeddingRecord, IndexError),
    Missing,
}

/// Record counts for the status command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub model_id: String,
    pub dimensions: usize,
    pub refresh_policy: RefreshPolicy,
    pub store_backend: StoreBackend,
    pub notes: usize,
    pub records: usize,
    pub current: usize,
    pub stale: usize,
    pub outdated: usize,
    pub per_model: BTreeMap<String, usize>,
}

struct Active {
    config: Config,
    store: Arc<dyn RecordStore>,
    manager: IndexManager,
    query: QueryEngine,
}

pub struct SessionHandle {
    paths: VaultPaths,
    notes: Arc<dyn NoteSource>,
    providers: ProviderFactory,
    active: RwLock<Arc<Active>>,
    writer: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    pass: Mutex<CancellationToken>,
}

impl SessionHandle {
    /// Open a session over the markdown files under `paths.root`
    pub fn initialize(paths: VaultPaths, config: Config) -> Result<Self> {
        let notes = Arc::new(VaultNotes::new(&paths.root));
        Self::initialize_with(paths, config, notes, Arc::new(build_provider))
    }

    pub fn initialize_with(
        paths: VaultPaths,
        config: Config,
        notes: Arc<dyn NoteSource>,
        providers: ProviderFactory,
    ) -> Result<Self> {
        let active = build_active(&paths, &notes, &providers, config)?;
        info!(
            vault = %paths.root.display(),
            model = %active.config.model_id,
            policy = %active.config.refresh_policy,
            "session initialized"
        );
        let shutdown = CancellationToken::new();
        Ok(Self {
            pass: Mutex::new(shutdown.child_token()),
            paths,
            notes,
            providers,
            active: RwLock::new(Arc::new(active)),
            writer: tokio::sync::Mutex::new(()),
            shutdown,
        })
    }

    /// Cancel running work and wait for the writer to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _guard = self.writer.lock().await;
        debug!(vault = %self.paths.root.display(), "session shut down");
    }

    fn active(&self) -> Arc<Active> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn config(&self) -> Config {
        self.active().config.clone()
    }

    pub fn note_state(&self, path: &str) -> NoteState {
        self.active().manager.state_of(path)
    }

    /// Generate and store the embedding of one note, even if unchanged
    pub async fn embed_note(&self, path: &str) -> Result<NoteOutcome> {
        let _guard = self.writer.lock().await;
        self.active().manager.embed_note(path, &self.shutdown).await
    }

    pub async fn load_embedding(&self, path: &str) -> Result<LoadedEmbedding> {
        let active = self.active();
        let path = normalize_note_path(path);
        let Some(record) = active.store.get(&path).await? else {
            return Ok(LoadedEmbedding::Missing);
        };
        Ok(
            match record.check_compatible(active.manager.model_id(), active.manager.dimensions()) {
                Ok(()) => LoadedEmbedding::Found(record),
                Err(stale) => LoadedEmbedding::Stale(record, stale),
            },
        )
    }

    /// Full pass over the vault
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        self.reindex(false).await
    }

    /// Clear the store, then run a full pass
    pub async fn rebuild(&self) -> Result<ReindexReport> {
        self.reindex(true).await
    }

    async fn reindex(&self, rebuild: bool) -> Result<ReindexReport> {
        let token = self
            .pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let _guard = self.writer.lock().await;
        if token.is_cancelled() {
            return Ok(ReindexReport {
                cancelled: true,
                ..ReindexReport::default()
            });
        }

        let active = self.active();
        if rebuild {
            info!("clearing embedding store for rebuild");
            active.store.clear().await?;
        }
        active.manager.reindex_all(&token).await
    }

    /// Stop the running pass and any pass waiting to start
    pub fn cancel_reindex(&self) {
        let mut pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        pass.cancel();
        *pass = self.shutdown.child_token();
    }

    /// Notes most similar to `path`; embeds the note first when its record is not current
    pub async fn find_similar(&self, path: &str, k: Option<usize>) -> Result<QueryResults> {
        let path = normalize_note_path(path);
        let active = self.active();
        let k = k.unwrap_or(active.config.top_k);

        let mut busy = false;
        if !active.manager.exclusions().is_excluded(&path) && !self.is_current(&active, &path).await
        {
            // a running pass holds the writer; answer from the stored record
            match self.writer.try_lock() {
                Ok(_guard) => match active.manager.refresh_note(&path, &self.shutdown).await {
                    Ok(outcome) => debug!(path = %path, ?outcome, "refreshed query note"),
                    Err(e) => warn!(path = %path, error = %e, "could not refresh query note"),
                },
                Err(_) => {
                    debug!(path = %path, "index busy, querying stored embedding");
                    busy = true;
                }
            }
        }

        let mut results = active.query.query(QueryTarget::Note(&path), k).await;
        if busy && results.warning.is_none() {
            results.warning = Some(format!(
                "{path} changed while the index is being updated; results may be stale"
            ));
        }
        Ok(results)
    }

    async fn is_current(&self, active: &Active, path: &str) -> bool {
        let Ok(content) = self.notes.read_note(path).await else {
            return false;
        };
        match active.store.get(path).await {
            Ok(Some(record)) => record.is_current(
                &content_hash(&content),
                active.manager.model_id(),
                active.manager.dimensions(),
            ),
            _ => false,
        }
    }

    /// Notes most similar to an arbitrary vector from the active model
    pub async fn similar_to_vector(&self, vector: &[f32], k: Option<usize>) -> QueryResults {
        let active = self.active();
        let k = k.unwrap_or(active.config.top_k);
        active.query.query(QueryTarget::Vector(vector), k).await
    }

    /// Content of a note changed; `None` when the policy ignores it
    pub async fn note_modified(&self, path: &str) -> Result<Option<NoteOutcome>> {
        match self.active().config.refresh_policy {
            RefreshPolicy::Always => self.refresh(path).await.map(Some),
            RefreshPolicy::Manual | RefreshPolicy::OnNewNote => Ok(None),
        }
    }

    pub async fn note_created(&self, path: &str) -> Result<Option<NoteOutcome>> {
        match self.active().config.refresh_policy {
            RefreshPolicy::Always | RefreshPolicy::OnNewNote => self.refresh(path).await.map(Some),
            RefreshPolicy::Manual => Ok(None),
        }
    }

    /// A note was deleted; its record goes regardless of policy
    pub async fn note_deleted(&self, path: &str) -> Result<NoteOutcome> {
        let _guard = self.writer.lock().await;
        self.active().manager.remove_note(path).await?;
        Ok(NoteOutcome::Removed)
    }

    /// Old record is dropped; the new path is handled like a created note
    pub async fn note_renamed(&self, from: &str, to: &str) -> Result<Option<NoteOutcome>> {
        self.note_deleted(from).await?;
        self.note_created(to).await
    }

    async fn refresh(&self, path: &str) -> Result<NoteOutcome> {
        let _guard = self.writer.lock().await;
        self.active().manager.refresh_note(path, &self.shutdown).await
    }

    /// Swap in a new config, cancelling any running pass
    ///
    /// A model change leaves old records in place; they are stale until the
    /// next pass replaces them.
    pub async fn update_config(&self, config: Config) -> Result<()> {
        let next = build_active(&self.paths, &self.notes, &self.providers, config)?;
        self.cancel_reindex();

        let _guard = self.writer.lock().await;
        let previous = self.active();
        if previous.config.model_id != next.config.model_id {
            info!(
                from = %previous.config.model_id,
                to = %next.config.model_id,
                "embedding model changed, existing records are stale"
            );
        }
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let active = self.active();
        let model_id = active.manager.model_id().to_string();
        let dimensions = active.manager.dimensions();
        let exclusions = active.manager.exclusions();

        let notes = self
            .notes
            .list_notes()
            .await?
            .iter()
            .filter(|p| !exclusions.is_excluded(p))
            .count();

        let snapshot = active.store.list_all().await?;
        let mut per_model: BTreeMap<String, usize> = BTreeMap::new();
        let mut current = 0;
        let mut outdated = 0;
        for (path, record) in snapshot.iter() {
            *per_model.entry(record.model_id.clone()).or_default() += 1;
            if record.check_compatible(&model_id, dimensions).is_ok() {
                current += 1;
                if let Ok(content) = self.notes.read_note(path).await {
                    if record.content_hash != content_hash(&content) {
                        outdated += 1;
                    }
                }
            }
        }

        Ok(IndexStatus {
            refresh_policy: active.config.refresh_policy,
            store_backend: active.config.store_backend,
            records: snapshot.len(),
            stale: snapshot.len() - current,
            model_id,
            dimensions,
            notes,
            current,
            outdated,
            per_model,
        })
    }
}

fn build_active(
    paths: &VaultPaths,
    notes: &Arc<dyn NoteSource>,
    providers: &ProviderFactory,
    config: Config,
) -> Result<Active> {
    config.validate()?;
    let provider = providers(&config)?;
    let dimensions = config.embedding_dimensions()?;
    if provider.dimensions() != dimensions {
        return Err(ConfigError::UnknownDimensions(config.model_id.clone()).into());
    }

    let store = open_store(paths, config.store_backend)?;
    let exclusions = Exclusions::new(&config.exclusions);
    let manager = IndexManager::new(
        store.clone(),
        notes.clone(),
        provider.clone(),
        exclusions.clone(),
        IndexSettings::from_config(&config),
    );
    let query = QueryEngine::new(store.clone(), exclusions, provider.model_id(), dimensions);

    Ok(Active {
        config,
        store,
        manager,
        query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MAX_TOP_K;
    use crate::testing::{MemoryNotes, MockProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    fn mock_config(model: &str) -> Config {
        Config {
            model_id: model.into(),
            provider_credential: "test-key".into(),
            dimensions: Some(16),
            retry_delay_ms: 1,
            ..Config::default()
        }
    }

    fn mock_factory(calls: Arc<AtomicUsize>) -> ProviderFactory {
        Arc::new(move |config: &Config| -> Result<Arc<dyn EmbeddingProvider>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockProvider::new(
                &config.model_id,
                config.embedding_dimensions()?,
            )))
        })
    }

    struct Fixture {
        session: SessionHandle,
        notes: Arc<MemoryNotes>,
        builds: Arc<AtomicUsize>,
        _tmp: TempDir,
    }

    fn fixture(config: Config) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let notes = Arc::new(MemoryNotes::with_notes([
            ("Rust/ownership.md", "rust ownership borrowing"),
            ("Rust/lifetimes.md", "rust lifetimes borrowing"),
            ("Cooking/bread.md", "flour water yeast"),
            ("Templates/note.md", "rust template"),
        ]));
        let builds = Arc::new(AtomicUsize::new(0));
        let session = SessionHandle::initialize_with(
            VaultPaths::from_root(tmp.path().to_path_buf()),
            config,
            notes.clone(),
            mock_factory(builds.clone()),
        )
        .unwrap();
        Fixture {
            session,
            notes,
            builds,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn test_invalid_config_blocks_start() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            top_k: MAX_TOP_K + 1,
            ..Config::local()
        };
        let result = SessionHandle::initialize(VaultPaths::from_root(tmp.path().to_path_buf()), config);
        assert!(matches!(
            result,
            Err(crate::Error::Config(ConfigError::TopKOutOfRange { .. }))
        ));

        let result = SessionHandle::initialize(
            VaultPaths::from_root(tmp.path().to_path_buf()),
            Config::default(),
        );
        assert!(matches!(
            result,
            Err(crate::Error::Config(ConfigError::MissingCredential { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reindex_then_find_similar() -> anyhow::Result<()> {
        let fx = fixture(Config {
            exclusions: vec!["Templates".into()],
            ..mock_config("mock")
        });
        let report = fx.session.reindex_all().await?;
        assert_eq!(report.embedded, 3);

        let results = fx.session.find_similar("Rust/ownership.md", Some(5)).await?;
        let paths: Vec<&str> = results.matches.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], "Rust/lifetimes.md");
        assert!(!paths.contains(&"Rust/ownership.md"));
        assert!(!paths.contains(&"Templates/note.md"));
        Ok(())
    }

    #[tokio::test]
    async fn test_find_similar_embeds_query_note_on_demand() -> anyhow::Result<()> {
        let fx = fixture(mock_config("mock"));
        fx.session.reindex_all().await?;

        fx.notes.insert("Rust/traits.md", "rust traits generics");
        assert!(matches!(
            fx.session.load_embedding("Rust/traits.md").await?,
            LoadedEmbedding::Missing
        ));

        let results = fx.session.find_similar("Rust/traits.md", None).await?;
        assert!(results.warning.is_none());
        assert!(!results.matches.is_empty());
        assert!(matches!(
            fx.session.load_embedding("Rust/traits.md").await?,
            LoadedEmbedding::Found(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_policies() -> anyhow::Result<()> {
        let fx = fixture(mock_config("mock"));
        fx.notes.insert("new.md", "fresh note");

        // manual ignores everything but deletion
        assert_eq!(fx.session.note_created("new.md").await?, None);
        assert_eq!(fx.session.note_modified("new.md").await?, None);

        fx.session
            .update_config(Config {
                refresh_policy: RefreshPolicy::OnNewNote,
                ..mock_config("mock")
            })
            .await?;
        assert_eq!(fx.session.note_modified("new.md").await?, None);
        assert_eq!(
            fx.session.note_created("new.md").await?,
            Some(NoteOutcome::Stored)
        );

        fx.session
            .update_config(Config {
                refresh_policy: RefreshPolicy::Always,
                ..mock_config("mock")
            })
            .await?;
        fx.notes.insert("new.md", "fresh note, edited");
        assert_eq!(
            fx.session.note_modified("new.md").await?,
            Some(NoteOutcome::Stored)
        );
        assert_eq!(
            fx.session.note_modified("new.md").await?,
            Some(NoteOutcome::Unchanged)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_rename_events() -> anyhow::Result<()> {
        let fx = fixture(Config {
            refresh_policy: RefreshPolicy::OnNewNote,
            ..mock_config("mock")
        });
        fx.session.reindex_all().await?;

        fx.session.note_deleted("Cooking/bread.md").await?;
        assert!(matches!(
            fx.session.load_embedding("Cooking/bread.md").await?,
            LoadedEmbedding::Missing
        ));

        let content = "rust ownership borrowing";
        fx.notes.remove("Rust/ownership.md");
        fx.notes.insert("Rust/moved.md", content);
        let outcome = fx
            .session
            .note_renamed("Rust/ownership.md", "Rust/moved.md")
            .await?;
        assert_eq!(outcome, Some(NoteOutcome::Stored));
        assert!(matches!(
            fx.session.load_embedding("Rust/ownership.md").await?,
            LoadedEmbedding::Missing
        ));
        match fx.session.load_embedding("Rust/moved.md").await? {
            LoadedEmbedding::Found(record) => assert_eq!(record.content_hash, content_hash(content)),
            other => panic!("expected record, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_model_change_invalidates_records() -> anyhow::Result<()> {
        let fx = fixture(mock_config("model-a"));
        fx.session.reindex_all().await?;

        fx.session.update_config(mock_config("model-b")).await?;
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);

        // old records are never ranked against the new model
        let results = fx.session.similar_to_vector(&[1.0; 16], Some(10)).await;
        assert!(results.matches.is_empty());
        assert!(matches!(
            fx.session.load_embedding("Cooking/bread.md").await?,
            LoadedEmbedding::Stale(_, IndexError::ModelMismatch { .. })
        ));
        let status = fx.session.status().await?;
        assert_eq!(status.current, 0);
        assert_eq!(status.stale, 4);

        fx.session.reindex_all().await?;
        let status = fx.session.status().await?;
        assert_eq!(status.current, 4);
        assert_eq!(status.per_model.get("model-b"), Some(&4));
        assert_eq!(status.per_model.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_counts_outdated_notes() -> anyhow::Result<()> {
        let fx = fixture(mock_config("mock"));
        fx.session.reindex_all().await?;
        fx.notes.insert("Cooking/bread.md", "sourdough starter");

        let status = fx.session.status().await?;
        assert_eq!(status.notes, 4);
        assert_eq!(status.records, 4);
        assert_eq!(status.outdated, 1);
        assert_eq!(status.model_id, "mock");
        Ok(())
    }

    #[tokio::test]
    async fn test_rebuild_clears_first() -> anyhow::Result<()> {
        let fx = fixture(mock_config("mock"));
        fx.session.reindex_all().await?;
        let report = fx.session.rebuild().await?;
        assert_eq!(report.embedded, 4);
        assert_eq!(report.unchanged, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_backend() -> anyhow::Result<()> {
        let fx = fixture(Config {
            store_backend: StoreBackend::Sqlite,
            ..mock_config("mock")
        });
        let report = fx.session.reindex_all().await?;
        assert_eq!(report.embedded, 4);
        assert!(fx.session.paths().database.exists());

        let results = fx.session.find_similar("Rust/ownership.md", Some(1)).await?;
        assert_eq!(results.matches.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_model_end_to_end() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        std::fs::write(tmp.path().join("alpha.md"), "vector search engine")?;
        std::fs::write(tmp.path().join("beta.md"), "vector search index")?;
        std::fs::write(tmp.path().join("gamma.md"), "baking bread at home")?;

        let session = SessionHandle::initialize(
            VaultPaths::from_root(tmp.path().to_path_buf()),
            Config::local(),
        )?;
        let report = session.reindex_all().await?;
        assert_eq!(report.embedded, 3);

        let results = session.find_similar("alpha.md", Some(2)).await?;
        assert_eq!(results.matches.len(), 2);
        assert!(results.matches[0].score >= results.matches[1].score);
        session.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_pass_starts() -> anyhow::Result<()> {
        let fx = fixture(mock_config("mock"));
        fx.session.shutdown.cancel();
        let report = fx.session.reindex_all().await?;
        assert!(report.cancelled);
        assert_eq!(report.embedded, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_answers_while_pass_runs() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let notes = Arc::new(MemoryNotes::with_notes([
            ("a.md", "rust ownership"),
            ("b.md", "rust borrowing"),
            ("c.md", "slowmarker body"),
        ]));
        let gate = Arc::new(Semaphore::new(0));
        let provider = Arc::new(MockProvider::new("mock", 16).with_gate("slowmarker", gate.clone()));
        let factory: ProviderFactory = {
            let provider = provider.clone();
            Arc::new(move |_: &Config| -> Result<Arc<dyn EmbeddingProvider>> { Ok(provider.clone()) })
        };
        let session = Arc::new(SessionHandle::initialize_with(
            VaultPaths::from_root(tmp.path().to_path_buf()),
            mock_config("mock"),
            notes.clone(),
            factory,
        )?);

        let pass = tokio::spawn({
            let session = session.clone();
            async move { session.reindex_all().await }
        });
        while provider.calls() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        notes.insert("b.md", "rust borrowing, edited");
        let results = tokio::time::timeout(
            Duration::from_secs(1),
            session.find_similar("b.md", Some(5)),
        )
        .await??;
        let paths: Vec<&str> = results.matches.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md"]);
        assert!(results.warning.is_some());

        gate.add_permits(1);
        let report = pass.await??;
        assert_eq!(report.embedded, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_reaches_pass_waiting_for_writer() -> anyhow::Result<()> {
        let Fixture { session, _tmp, .. } = fixture(mock_config("mock"));
        let session = Arc::new(session);

        let writer = session.writer.lock().await;
        let pass = tokio::spawn({
            let session = session.clone();
            async move { session.reindex_all().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.cancel_reindex();
        drop(writer);
        let report = pass.await??;
        assert!(report.cancelled);
        assert_eq!(report.embedded, 0);

        // later passes get a fresh token
        let report = session.reindex_all().await?;
        assert!(!report.cancelled);
        assert_eq!(report.embedded, 4);
        Ok(())
    }

}

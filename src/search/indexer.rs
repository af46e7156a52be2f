//! Index manager - decides which notes need (re)embedding
//!
//! A pass lists candidate notes, drops excluded ones, skips notes whose
//! stored record is current, embeds the rest through the provider and
//! prunes records that no longer belong to a candidate. One note failing
//! never aborts the pass.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::embedding::EmbeddingProvider;
use super::store::{EmbeddingRecord, RecordStore};
use crate::core::config::Config;
use crate::core::frontmatter::embedding_text;
use crate::core::note::{content_hash, note_title, NoteSource};
use crate::core::paths::{normalize_note_path, Exclusions};
use crate::error::{IndexError, ProviderError, Result};

/// Upper bound for one backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tunables for a pass, taken from the config
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Max provider calls in flight
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_input_chars: usize,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            max_input_chars: config.max_input_chars.max(1),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where a note is in the embedding lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteState {
    Unseen,
    Pending,
    Embedding,
    Stored,
    /// Transient failure; eligible again on the next pass
    Failed,
    /// Permanent failure for this content
    Skipped,
}

/// Result of processing one note
#[derive(Debug, Clone, PartialEq)]
pub enum NoteOutcome {
    Stored,
    Unchanged,
    Skipped { reason: String },
    Failed { reason: String },
    Removed,
    Cancelled,
}

/// A note that was not stored; an empty path means the pass as a whole
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteProblem {
    pub path: String,
    pub reason: String,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexReport {
    pub embedded: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    /// The pass stopped before every note was processed
    pub cancelled: bool,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
    pub problems: Vec<NoteProblem>,
}

fn as_millis<S: Serializer>(duration: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

impl ReindexReport {
    fn record(&mut self, path: String, outcome: NoteOutcome) {
        match outcome {
            NoteOutcome::Stored => self.embedded += 1,
            NoteOutcome::Unchanged => self.unchanged += 1,
            NoteOutcome::Removed => self.removed += 1,
            NoteOutcome::Cancelled => self.cancelled = true,
            NoteOutcome::Skipped { reason } => {
                self.skipped += 1;
                self.problems.push(NoteProblem { path, reason });
            }
            NoteOutcome::Failed { reason } => {
                self.failed += 1;
                self.problems.push(NoteProblem { path, reason });
            }
        }
    }
}

enum GenerateError {
    Cancelled,
    Provider(ProviderError),
}

/// Backoff before retry number `attempt` (0-based)
fn backoff(hint: Option<Duration>, base: Duration, attempt: u32) -> Duration {
    hint.unwrap_or_else(|| base.saturating_mul(1u32 << attempt.min(16)))
        .min(MAX_BACKOFF)
}

pub struct IndexManager {
    store: Arc<dyn RecordStore>,
    notes: Arc<dyn NoteSource>,
    provider: Arc<dyn EmbeddingProvider>,
    exclusions: Exclusions,
    settings: IndexSettings,
    states: Mutex<HashMap<String, NoteState>>,
}

impl IndexManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notes: Arc<dyn NoteSource>,
        provider: Arc<dyn EmbeddingProvider>,
        exclusions: Exclusions,
        settings: IndexSettings,
    ) -> Self {
        Self {
            store,
            notes,
            provider,
            exclusions,
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    /// Last known state of a note in this session
    pub fn state_of(&self, path: &str) -> NoteState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_note_path(path))
            .copied()
            .unwrap_or(NoteState::Unseen)
    }

    fn set_state(&self, path: &str, state: NoteState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), state);
    }

    fn forget(&self, path: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Bring every record in line with the vault
    ///
    /// Pruning of deleted and excluded notes only runs when the pass was not
    /// cancelled.
    pub async fn reindex_all(&self, cancel: &CancellationToken) -> Result<ReindexReport> {
        let started = Instant::now();
        let mut report = ReindexReport::default();

        let mut candidates: Vec<String> = self
            .notes
            .list_notes()
            .await?
            .iter()
            .map(|p| normalize_note_path(p))
            .filter(|p| !p.is_empty())
            .filter(|p| !self.exclusions.is_excluded(p))
            .collect();
        candidates.sort();
        candidates.dedup();

        info!(
            notes = candidates.len(),
            model = %self.model_id(),
            concurrency = self.settings.concurrency,
            "starting reindex"
        );

        for path in &candidates {
            self.set_state(path, NoteState::Pending);
        }

        let mut outcomes = stream::iter(candidates.clone())
            .map(|path| async move {
                tokio::task::yield_now().await;
                let outcome = if cancel.is_cancelled() {
                    NoteOutcome::Cancelled
                } else {
                    self.process(&path, false, cancel).await
                };
                (path, outcome)
            })
            .buffer_unordered(self.settings.concurrency);

        while let Some((path, outcome)) = outcomes.next().await {
            report.record(path, outcome);
        }
        drop(outcomes);

        if cancel.is_cancelled() {
            report.cancelled = true;
            info!("reindex cancelled, skipping prune");
        } else {
            let keep: HashSet<&str> = candidates.iter().map(String::as_str).collect();
            self.prune(&keep, &mut report).await;
        }

        report.duration = started.elapsed();
        info!(
            embedded = report.embedded,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            removed = report.removed,
            duration_ms = report.duration.as_millis() as u64,
            "reindex finished"
        );
        Ok(report)
    }

    async fn prune(&self, keep: &HashSet<&str>, report: &mut ReindexReport) {
        let stale: Vec<String> = match self.store.list_all().await {
            Ok(snapshot) => snapshot
                .iter()
                .filter(|(p, _)| !keep.contains(p))
                .map(|(p, _)| p.to_string())
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list records, skipping prune");
                report.problems.push(NoteProblem {
                    path: String::new(),
                    reason: format!("prune skipped: {e}"),
                });
                return;
            }
        };

        for path in stale {
            match self.store.delete(&path).await {
                Ok(()) => {
                    debug!(path = %path, "removed record for deleted or excluded note");
                    self.forget(&path);
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to remove stale record");
                    report.failed += 1;
                    report.problems.push(NoteProblem {
                        reason: e.to_string(),
                        path,
                    });
                }
            }
        }
    }

    /// Update one note after it changed
    ///
    /// Excluded or vanished notes lose their record.
    pub async fn refresh_note(&self, path: &str, cancel: &CancellationToken) -> Result<NoteOutcome> {
        self.run_single(path, false, cancel).await
    }

    /// Embed one note even if its record is current
    pub async fn embed_note(&self, path: &str, cancel: &CancellationToken) -> Result<NoteOutcome> {
        self.run_single(path, true, cancel).await
    }

    async fn run_single(
        &self,
        path: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<NoteOutcome> {
        let path = normalize_note_path(path);
        if self.exclusions.is_excluded(&path) {
            self.remove_note(&path).await?;
            return Ok(NoteOutcome::Removed);
        }
        self.set_state(&path, NoteState::Pending);
        Ok(self.process(&path, force, cancel).await)
    }

    /// Drop the record of a note; missing records are fine
    pub async fn remove_note(&self, path: &str) -> Result<()> {
        let path = normalize_note_path(path);
        self.store.delete(&path).await?;
        self.forget(&path);
        Ok(())
    }

    async fn process(&self, path: &str, force: bool, cancel: &CancellationToken) -> NoteOutcome {
        let content = match self.notes.read_note(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return match self.remove_note(path).await {
                    Ok(()) => NoteOutcome::Removed,
                    Err(e) => self.fail(path, e.to_string()),
                };
            }
            Err(e) => {
                warn!(path, error = %e, "failed to read note");
                return self.fail(path, format!("read failed: {e}"));
            }
        };

        let hash = content_hash(&content);
        let model_id = self.provider.model_id();
        let dims = self.provider.dimensions();

        if !force {
            match self.store.get(path).await {
                Ok(Some(record)) if record.is_current(&hash, model_id, dims) => {
                    self.set_state(path, NoteState::Stored);
                    return NoteOutcome::Unchanged;
                }
                Ok(_) => {}
                Err(e) => warn!(path, error = %e, "failed to read stored record, regenerating"),
            }
        }

        let text = embedding_text(note_title(path), &content, self.settings.max_input_chars);
        self.set_state(path, NoteState::Embedding);

        let vector = match self.generate_with_retry(path, &text, cancel).await {
            Ok(vector) => vector,
            Err(GenerateError::Cancelled) => {
                self.set_state(path, NoteState::Pending);
                return NoteOutcome::Cancelled;
            }
            Err(GenerateError::Provider(e)) if e.is_transient() => {
                warn!(path, error = %e, "embedding failed after retries");
                return self.fail(path, e.to_string());
            }
            Err(GenerateError::Provider(e)) => {
                warn!(path, error = %e, "embedding rejected, skipping note");
                self.set_state(path, NoteState::Skipped);
                return NoteOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        if vector.len() != dims {
            let err = IndexError::DimensionMismatch {
                path: path.to_string(),
                expected: dims,
                actual: vector.len(),
            };
            warn!(error = %err, "provider returned a vector of the wrong size");
            self.set_state(path, NoteState::Skipped);
            return NoteOutcome::Skipped {
                reason: err.to_string(),
            };
        }

        if cancel.is_cancelled() {
            self.set_state(path, NoteState::Pending);
            return NoteOutcome::Cancelled;
        }

        let record = EmbeddingRecord {
            path: path.to_string(),
            vector,
            model_id: model_id.to_string(),
            content_hash: hash,
            updated_at: Utc::now(),
        };
        match self.store.put(&record).await {
            Ok(()) => {
                debug!(path, model = model_id, "embedded note");
                self.set_state(path, NoteState::Stored);
                NoteOutcome::Stored
            }
            Err(e) => {
                warn!(path, error = %e, "failed to store embedding");
                self.fail(path, e.to_string())
            }
        }
    }

    fn fail(&self, path: &str, reason: String) -> NoteOutcome {
        self.set_state(path, NoteState::Failed);
        NoteOutcome::Failed { reason }
    }

    async fn generate_with_retry(
        &self,
        path: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<f32>, GenerateError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
                result = self.provider.generate(text) => result,
            };

            let err = match result {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => e,
                Err(e) => return Err(GenerateError::Provider(e)),
            };

            let delay = backoff(err.retry_after(), self.settings.retry_delay, attempt);
            debug!(
                path,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider error, retrying"
            );
            self.set_state(path, NoteState::Failed);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            self.set_state(path, NoteState::Embedding);
            attempt += 1;
        }
    }
}

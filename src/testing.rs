//! Test doubles shared by the indexer and session tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::core::note::NoteSource;
use crate::core::paths::normalize_note_path;
use crate::error::ProviderError;
use crate::search::embedding::EmbeddingProvider;

type CallHook = Box<dyn Fn(usize) + Send + Sync>;

/// Deterministic provider: one bucket per word, counted
///
/// Failures are scripted per marker; a request whose text contains the
/// marker consumes the next scripted error.
pub struct MockProvider {
    model_id: String,
    dims: usize,
    output_dims: usize,
    calls: AtomicUsize,
    scripted: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    always: Mutex<HashMap<String, ProviderError>>,
    hook: Option<CallHook>,
    gate: Option<(String, Arc<Semaphore>)>,
}

impl MockProvider {
    pub fn new(model_id: &str, dims: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dims,
            output_dims: dims,
            calls: AtomicUsize::new(0),
            scripted: Mutex::new(HashMap::new()),
            always: Mutex::new(HashMap::new()),
            hook: None,
            gate: None,
        }
    }

    /// Report `dims` but return vectors of `output` length
    pub fn with_output_dims(mut self, output: usize) -> Self {
        self.output_dims = output;
        self
    }

    /// Called with the 1-based call number before each request completes
    pub fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Requests containing `marker` wait for a permit on `gate`
    pub fn with_gate(mut self, marker: &str, gate: Arc<Semaphore>) -> Self {
        self.gate = Some((marker.to_string(), gate));
        self
    }

    pub fn fail_times(&self, marker: &str, error: ProviderError, times: usize) {
        self.scripted
            .lock()
            .unwrap()
            .entry(marker.to_string())
            .or_default()
            .extend(std::iter::repeat(error).take(times));
    }

    pub fn fail_always(&self, marker: &str, error: ProviderError) {
        self.always.lock().unwrap().insert(marker.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_error(&self, text: &str) -> Option<ProviderError> {
        if let Some(err) = self
            .always
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| text.contains(marker.as_str()))
            .map(|(_, err)| err.clone())
        {
            return Some(err);
        }
        self.scripted
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(marker, queue)| text.contains(marker.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front())
    }
}

pub fn keyword_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dims];
    for word in text.split_whitespace() {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        vector[bucket % dims] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(call);
        }
        if let Some((marker, gate)) = &self.gate {
            if text.contains(marker.as_str()) {
                let _permit = gate.acquire().await;
            }
        }
        if let Some(err) = self.scripted_error(text) {
            return Err(err);
        }
        Ok(keyword_vector(text, self.output_dims))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Notes held in memory
#[derive(Default)]
pub struct MemoryNotes {
    notes: Mutex<BTreeMap<String, String>>,
}

impl MemoryNotes {
    pub fn with_notes<'a>(notes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let source = Self::default();
        for (path, content) in notes {
            source.insert(path, content);
        }
        source
    }

    pub fn insert(&self, path: &str, content: &str) {
        self.notes
            .lock()
            .unwrap()
            .insert(normalize_note_path(path), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.notes.lock().unwrap().remove(&normalize_note_path(path));
    }
}

#[async_trait]
impl NoteSource for MemoryNotes {
    async fn list_notes(&self) -> io::Result<Vec<String>> {
        Ok(self.notes.lock().unwrap().keys().cloned().collect())
    }

    async fn read_note(&self, path: &str) -> io::Result<String> {
        self.notes
            .lock()
            .unwrap()
            .get(&normalize_note_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}

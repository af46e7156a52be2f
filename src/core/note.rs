use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use super::paths::{is_hidden, normalize_note_path};

/// Read access to the notes of a vault
///
/// Paths are vault-relative and normalized. Implementations are treated as
/// a trustworthy data source.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Every note currently in the vault
    async fn list_notes(&self) -> io::Result<Vec<String>>;

    /// Raw content of one note; `ErrorKind::NotFound` when it no longer exists
    async fn read_note(&self, path: &str) -> io::Result<String>;
}

/// Markdown files under a vault root
///
/// Hidden directories (`.obsidian`, `.embeddings`, `.trash`) are skipped.
pub struct VaultNotes {
    root: PathBuf,
}

impl VaultNotes {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl NoteSource for VaultNotes {
    async fn list_notes(&self) -> io::Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || collect_note_paths(&root))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    async fn read_note(&self, path: &str) -> io::Result<String> {
        let relative = normalize_note_path(path);
        if relative.is_empty() || relative.split('/').any(|s| s == "..") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid note path: {path}"),
            ));
        }
        tokio::fs::read_to_string(self.root.join(relative)).await
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map(|e| e == "md").unwrap_or(false)
}

fn is_hidden_entry(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

pub fn collect_note_paths(root: &Path) -> io::Result<Vec<String>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("vault not found: {}", root.display()),
        ));
    }

    let mut notes = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden_entry(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable vault entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_markdown(path) {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            let key = normalize_note_path(&relative.to_string_lossy());
            if !key.is_empty() && !is_hidden(&key) {
                notes.push(key);
            }
        }
    }

    notes.sort();
    Ok(notes)
}

/// SHA-256 hex digest of note content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Display title of a note: its file stem
pub fn note_title(note_path: &str) -> &str {
    let name = note_path.rsplit('/').next().unwrap_or(note_path);
    name.strip_suffix(".md").unwrap_or(name)
}

//! CLI command runners

pub mod embed;
pub mod init;
pub mod reindex;
pub mod show;
pub mod similar;
pub mod status;
#[cfg(feature = "watch")]
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use colored::Colorize;

use vault_embeddings::{Config, NoteOutcome, SessionHandle, VaultPaths};

/// Vault location and overrides shared by every command
pub struct Context {
    vault: PathBuf,
    api_key: Option<String>,
}

impl Context {
    pub fn new(vault: PathBuf, api_key: Option<String>) -> Self {
        Self { vault, api_key }
    }

    pub fn vault(&self) -> &Path {
        &self.vault
    }

    pub fn paths(&self) -> VaultPaths {
        VaultPaths::from_root(self.vault.clone())
    }

    /// Config from disk, with the CLI credential filling an empty one
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.paths().config)?;
        if config.provider_credential.trim().is_empty() {
            if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
                config.provider_credential = key.to_string();
            }
        }
        Ok(config)
    }

    pub fn open_session(&self) -> Result<SessionHandle> {
        let config = self.load_config()?;
        SessionHandle::initialize(self.paths(), config)
            .with_context(|| format!("failed to open vault {}", self.vault.display()))
    }
}

/// Colored one-line summary of a single-note outcome
pub fn describe_outcome(path: &str, outcome: &NoteOutcome) -> String {
    match outcome {
        NoteOutcome::Stored => format!("{} Embedded {}", "✓".green().bold(), path.cyan()),
        NoteOutcome::Unchanged => format!("{} {} is up to date", "→".dimmed(), path.cyan()),
        NoteOutcome::Removed => format!("{} Removed embedding for {}", "→".dimmed(), path.cyan()),
        NoteOutcome::Cancelled => format!("{} Cancelled {}", "!".yellow().bold(), path.cyan()),
        NoteOutcome::Skipped { reason } => {
            format!("{} Skipped {}: {}", "!".yellow().bold(), path.cyan(), reason)
        }
        NoteOutcome::Failed { reason } => {
            format!("{} Failed {}: {}", "✗".red().bold(), path.cyan(), reason)
        }
    }
}

pub fn outcome_name(outcome: &NoteOutcome) -> &'static str {
    match outcome {
        NoteOutcome::Stored => "stored",
        NoteOutcome::Unchanged => "unchanged",
        NoteOutcome::Removed => "removed",
        NoteOutcome::Cancelled => "cancelled",
        NoteOutcome::Skipped { .. } => "skipped",
        NoteOutcome::Failed { .. } => "failed",
    }
}

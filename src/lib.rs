//! vault-embeddings library
//!
//! Embedding index and similar-notes engine for a markdown vault.
//!
//! # Modules
//!
//! - `core`: Vault paths, config, note source, frontmatter handling
//! - `search`: Providers, record stores, index manager, query engine
//! - `session`: Session handle tying the above together

pub mod core;
pub mod error;
pub mod search;
pub mod session;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use crate::core::config::{Config, RefreshPolicy, StoreBackend};
pub use crate::core::note::{NoteSource, VaultNotes};
pub use crate::core::paths::{Exclusions, VaultPaths};
pub use error::{ConfigError, Error, IndexError, ProviderError, Result, StorageError};
pub use search::indexer::{NoteOutcome, NoteState, ReindexReport};
pub use search::query::{QueryResults, SimilarNote};
pub use session::{IndexStatus, LoadedEmbedding, SessionHandle};

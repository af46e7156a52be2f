//! Embedding index and similarity search
//!
//! Providers turn note text into vectors, stores persist one record per
//! note, the index manager keeps records in line with the vault and the
//! query engine ranks them.

pub mod embedding;
pub mod file_store;
pub mod indexer;
pub mod openai;
pub mod query;
pub mod store;
pub mod vectordb;

pub use embedding::{cosine_similarity, EmbeddingProvider, HtpEmbedder};
pub use file_store::FileRecordStore;
pub use indexer::{IndexManager, IndexSettings};
pub use openai::OpenAiProvider;
pub use query::{QueryEngine, QueryTarget};
pub use store::{EmbeddingRecord, RecordSnapshot, RecordStore};
pub use vectordb::VectorDB;

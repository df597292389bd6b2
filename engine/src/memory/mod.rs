//! Long-term memory
//!
//! Facts distilled from past conversations are embedded and kept in a
//! vector store. At the start of a turn the driver embeds the user's text,
//! pulls the nearest facts and injects them into the prompt.
//!
//! The pieces are pluggable:
//! - [`VectorMemory`] is the store interface; [`store::VectorStore`] is an
//!   exhaustive linear-scan implementation.
//! - [`embedding::Embedder`] turns text into a fixed-dimension vector.
//! - [`summarizer::Summarizer`] turns an exchange into candidate facts.

use async_trait::async_trait;
use thiserror::Error;

use tera_sdk::errors::EngineError;
use tera_sdk::types::{MemoryRecord, ScoredMemory};

pub mod embedding;
pub mod similarity;
pub mod store;
pub mod summarizer;

pub use embedding::{Embedder, HashingEmbedder, OpenAIEmbedder};
pub use similarity::Metric;
pub use store::VectorStore;
pub use summarizer::{ModelSummarizer, Summarizer};

/// Errors raised by the memory subsystem
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Embedding dimension mismatch: store has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Memory store is corrupt: {0}")]
    CorruptStore(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Summarization failed: {0}")]
    Summarizer(String),

    #[error("Memory storage error: {0}")]
    Storage(String),
}

impl MemoryError {
    /// Errors after which the store cannot be trusted for the session
    pub fn disables_memory(&self) -> bool {
        matches!(
            self,
            MemoryError::DimensionMismatch { .. } | MemoryError::CorruptStore(_)
        )
    }
}

impl From<MemoryError> for EngineError {
    fn from(error: MemoryError) -> Self {
        EngineError::Memory(error.to_string())
    }
}

/// Vector store interface the driver depends on
///
/// Implementations must serialize writes against readers: a query observes
/// the state before or after an insert, never a partial record.
#[async_trait]
pub trait VectorMemory: Send + Sync {
    /// Fixed embedding dimension of this store
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Append a record and assign its id. Evicts the oldest records if the
    /// store would exceed its capacity.
    async fn insert(&self, text: String, embedding: Vec<f32>) -> Result<MemoryRecord, MemoryError>;

    /// Up to `k` nearest records, highest score first, ties most-recent-first
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredMemory>, MemoryError>;

    /// Evict oldest records until at most `max_records` remain; returns the
    /// number evicted
    async fn prune(&self, max_records: usize) -> usize;

    /// Remove every record
    async fn clear(&self);

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all records, oldest first
    async fn records(&self) -> Vec<MemoryRecord>;

    /// Write the full record set and dimension to durable storage
    async fn persist(&self) -> Result<(), MemoryError>;

    /// Replace the in-memory state from durable storage. On error the store
    /// is left empty.
    async fn load(&self) -> Result<usize, MemoryError>;
}

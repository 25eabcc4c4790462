//! Vector store abstraction shared by the local and Qdrant backends.

mod local;

pub use local::LocalVectorStore;

use super::types::{Chunk, ScoredChunk, VectorStoreError};
use async_trait::async_trait;

/// Chunk paired with its embedding, ready for insertion.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    /// Chunk text and metadata.
    pub chunk: Chunk,
    /// Embedding of `chunk.text`.
    pub vector: Vec<f32>,
}

/// Storage and nearest-neighbour search over embedded chunks, grouped into named collections.
///
/// `insert` replaces every record whose `source` matches one of the inserted chunks, so
/// re-ingesting a document overwrites its previous chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert records into `collection`, creating it when absent. Returns the number stored.
    async fn insert(
        &self,
        collection: &str,
        records: Vec<EmbeddedChunk>,
    ) -> Result<usize, VectorStoreError>;

    /// Open a previously persisted collection. `Ok(false)` when none exists.
    async fn open(&self, collection: &str) -> Result<bool, VectorStoreError>;

    /// Return up to `k` chunks ordered by descending cosine similarity to `vector`.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    /// Number of records held by `collection`.
    async fn count(&self, collection: &str) -> Result<usize, VectorStoreError>;
}

/// Distinct `source` labels among `records`, in first-seen order.
pub(crate) fn distinct_sources(records: &[EmbeddedChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for record in records {
        let source = &record.chunk.metadata.document.source;
        if !sources.iter().any(|seen| seen == source) {
            sources.push(source.clone());
        }
    }
    sources
}

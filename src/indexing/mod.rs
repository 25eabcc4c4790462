//! Indexing stage: chunking, embedding, vector storage, and retrieval.

pub mod chunking;
mod service;
pub mod store;
pub mod types;

pub use service::{IndexingService, VectorIndex, build_store, filter_empty_chunks};
pub use store::{EmbeddedChunk, LocalVectorStore, VectorStore};
pub use types::{
    Chunk, ChunkMetadata, ChunkingError, IndexingError, ScoredChunk, VectorStoreError,
};

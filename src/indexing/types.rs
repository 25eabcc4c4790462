//! Core data types and error definitions for the indexing stage.

use crate::embedding::EmbeddingClientError;
use crate::ingestion::DocumentMetadata;
use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Bounded segment of a document's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Segment text.
    pub text: String,
    /// Metadata inherited from the source document.
    pub metadata: ChunkMetadata,
}

/// Document metadata plus the chunk's position and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Metadata of the document the chunk came from.
    #[serde(flatten)]
    pub document: DocumentMetadata,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// SHA-256 hex digest of the chunk text.
    pub chunk_hash: String,
}

/// Retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Stored chunk.
    pub chunk: Chunk,
    /// Similarity score; higher is closer.
    pub score: f32,
}

/// Errors produced while turning documents into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunking was configured with an impossible budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors raised by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Reading or writing a persisted collection failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Collection file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted collection could not be decoded.
    #[error("collection file {path} is corrupt: {message}")]
    Corrupt {
        /// Collection file.
        path: PathBuf,
        /// Decoder diagnostic.
        message: String,
    },
    /// Transport-level failure talking to a remote store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Remote store answered with an unexpected status.
    #[error("unexpected response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body.
        body: String,
    },
    /// Query vector dimension does not match the stored vectors.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of stored vectors.
        expected: usize,
        /// Dimension supplied by the caller.
        actual: usize,
    },
    /// The requested collection does not exist.
    #[error("collection '{0}' not found")]
    MissingCollection(String),
    /// The store's internal lock was poisoned by a panicking writer.
    #[error("vector store lock poisoned")]
    Poisoned,
}

/// Errors emitted by the indexing service.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Every chunk was empty after whitespace trimming.
    #[error(
        "no extractable text was found in the uploaded documents; if this is a pure image scan, \
         enable FORCE_OCR or use a file with a text layer"
    )]
    NoExtractableContent,
    /// Chunking step failed.
    #[error("failed to chunk documents: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors.
    #[error("failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store interaction failed.
    #[error("vector store error: {0}")]
    Store(#[from] VectorStoreError),
}

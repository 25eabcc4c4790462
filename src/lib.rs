#![deny(missing_docs)]

//! Retrieval-augmented question answering over uploaded documents.

/// Question answering agent, prompts, and conversation memory.
pub mod agent;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Chunking, embedding, and vector index management.
pub mod indexing;
/// Document conversion, artifact persistence, and OCR fallback.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Stage wiring shared by the HTTP API and the CLI.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;

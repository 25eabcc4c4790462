//! Qdrant vector store integration.

pub mod client;
mod types;

pub use client::QdrantStore;

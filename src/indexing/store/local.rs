//! In-process vector store with optional JSON persistence.
//!
//! Records live in a `HashMap` of collections behind a `std::sync::RwLock`; search is a
//! brute-force cosine scan. With [`IndexPersistence::Persistent`] every write is flushed to
//! `<directory>/<collection>.json`, and [`VectorStore::open`] reloads that file.

use super::{EmbeddedChunk, VectorStore, distinct_sources};
use crate::config::IndexPersistence;
use crate::indexing::types::{Chunk, ScoredChunk, VectorStoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    collection: String,
    records: Vec<StoredRecord>,
}

/// Brute-force cosine store.
pub struct LocalVectorStore {
    persistence: IndexPersistence,
    collections: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl LocalVectorStore {
    /// Create an empty store.
    pub fn new(persistence: IndexPersistence) -> Self {
        Self {
            persistence,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Whether collections are written to disk.
    pub fn is_persistent(&self) -> bool {
        matches!(self.persistence, IndexPersistence::Persistent { .. })
    }

    fn collection_path(&self, collection: &str) -> Option<PathBuf> {
        match &self.persistence {
            IndexPersistence::Persistent { directory } => {
                Some(directory.join(format!("{collection}.json")))
            }
            IndexPersistence::Ephemeral => None,
        }
    }

    async fn flush(&self, collection: &str) -> Result<(), VectorStoreError> {
        let Some(path) = self.collection_path(collection) else {
            return Ok(());
        };
        let file = {
            let collections = self
                .collections
                .read()
                .map_err(|_| VectorStoreError::Poisoned)?;
            CollectionFile {
                collection: collection.to_string(),
                records: collections.get(collection).cloned().unwrap_or_default(),
            }
        };
        let payload = serde_json::to_vec(&file).map_err(|error| VectorStoreError::Corrupt {
            path: path.clone(),
            message: error.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| VectorStoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        // Staged write; rename is atomic within one filesystem.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload)
            .await
            .map_err(|source| VectorStoreError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| VectorStoreError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), records = file.records.len(), "Collection flushed");
        Ok(())
    }

    /// Records persisted for `collection`; `None` when ephemeral or never written.
    async fn read_persisted(
        &self,
        collection: &str,
    ) -> Result<Option<Vec<StoredRecord>>, VectorStoreError> {
        let Some(path) = self.collection_path(collection) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(VectorStoreError::Io { path, source }),
        };
        let file: CollectionFile =
            serde_json::from_slice(&bytes).map_err(|error| VectorStoreError::Corrupt {
                path: path.clone(),
                message: error.to_string(),
            })?;
        tracing::info!(path = %path.display(), records = file.records.len(), "Loaded persisted collection");
        Ok(Some(file.records))
    }

    /// Pull the persisted collection into memory before its first write in this process.
    async fn ensure_loaded(&self, collection: &str) -> Result<(), VectorStoreError> {
        let loaded = self
            .collections
            .read()
            .map_err(|_| VectorStoreError::Poisoned)?
            .contains_key(collection);
        if loaded {
            return Ok(());
        }

        let persisted = match self.read_persisted(collection).await {
            Ok(records) => records.unwrap_or_default(),
            Err(VectorStoreError::Corrupt { path, message }) => {
                tracing::warn!(path = %path.display(), error = %message, "Overwriting corrupt persisted collection");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        self.collections
            .write()
            .map_err(|_| VectorStoreError::Poisoned)?
            .entry(collection.to_string())
            .or_insert(persisted);
        Ok(())
    }
}

/// Dimension every vector in `collection` must share, taken from records that survive the write.
fn expected_dimension(
    stored: &[StoredRecord],
    sources: &[String],
    incoming: &[EmbeddedChunk],
) -> Option<usize> {
    stored
        .iter()
        .find(|record| !sources.contains(&record.chunk.metadata.document.source))
        .map(|record| record.vector.len())
        .or_else(|| incoming.first().map(|record| record.vector.len()))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn insert(
        &self,
        collection: &str,
        records: Vec<EmbeddedChunk>,
    ) -> Result<usize, VectorStoreError> {
        self.ensure_loaded(collection).await?;

        let sources = distinct_sources(&records);
        let inserted = records.len();
        {
            let mut collections = self
                .collections
                .write()
                .map_err(|_| VectorStoreError::Poisoned)?;
            let stored = collections.entry(collection.to_string()).or_default();
            if let Some(expected) = expected_dimension(stored, &sources, &records)
                && let Some(mismatched) = records
                    .iter()
                    .find(|record| record.vector.len() != expected)
            {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    actual: mismatched.vector.len(),
                });
            }

            let before = stored.len();
            stored.retain(|record| !sources.contains(&record.chunk.metadata.document.source));
            let replaced = before - stored.len();
            if replaced > 0 {
                tracing::info!(collection, replaced, "Replaced previous chunks for re-ingested sources");
            }
            stored.extend(records.into_iter().map(|record| StoredRecord {
                id: Uuid::new_v4().to_string(),
                chunk: record.chunk,
                vector: record.vector,
            }));
        }
        self.flush(collection).await?;
        Ok(inserted)
    }

    async fn open(&self, collection: &str) -> Result<bool, VectorStoreError> {
        {
            let collections = self
                .collections
                .read()
                .map_err(|_| VectorStoreError::Poisoned)?;
            if collections
                .get(collection)
                .is_some_and(|records| !records.is_empty())
            {
                return Ok(true);
            }
        }

        let records = match self.read_persisted(collection).await? {
            Some(records) if !records.is_empty() => records,
            _ => return Ok(false),
        };
        self.collections
            .write()
            .map_err(|_| VectorStoreError::Poisoned)?
            .insert(collection.to_string(), records);
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| VectorStoreError::Poisoned)?;
        let records = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::MissingCollection(collection.to_string()))?;
        if let Some(first) = records.first()
            && first.vector.len() != vector.len()
        {
            return Err(VectorStoreError::DimensionMismatch {
                expected: first.vector.len(),
                actual: vector.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = records
            .iter()
            .map(|record| ScoredChunk {
                chunk: record.chunk.clone(),
                score: cosine_sim(vector, &record.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorStoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| VectorStoreError::Poisoned)?;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

//! Indexing service coordinating chunking, embedding, and vector store writes.

use super::{
    chunking::{LengthCounter, build_counter, chunk_documents},
    store::{EmbeddedChunk, LocalVectorStore, VectorStore},
    types::{Chunk, IndexingError, ScoredChunk, VectorStoreError},
};
use crate::{
    config::{IndexPersistence, IndexSettings, VectorBackend},
    embedding::{EmbeddingClient, EmbeddingClientError},
    ingestion::NormalizedDocument,
    qdrant::QdrantStore,
};
use std::fmt;
use std::sync::Arc;

/// Handle onto a named collection that holds at least one non-empty chunk.
#[derive(Clone)]
pub struct VectorIndex {
    collection: String,
    store: Arc<dyn VectorStore>,
}

impl VectorIndex {
    /// Collection name backing this index.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> Result<usize, VectorStoreError> {
        self.store.count(&self.collection).await
    }

    /// True when the collection holds no records.
    pub async fn is_empty(&self) -> Result<bool, VectorStoreError> {
        Ok(self.len().await? == 0)
    }
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// Chunks documents, embeds chunks, and reads and writes the configured collection.
///
/// Construct once near process start and share through an `Arc`; the HTTP surface and the CLI
/// reuse the same instance.
pub struct IndexingService {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    settings: IndexSettings,
    counter: LengthCounter,
}

impl IndexingService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        settings: IndexSettings,
    ) -> Result<Self, IndexingError> {
        let counter = build_counter(settings.chunk_unit, &settings.embedding_model)?;
        Ok(Self {
            embedder,
            store,
            settings,
            counter,
        })
    }

    /// Assemble a service whose store is built from `settings.backend`.
    pub fn from_settings(
        embedder: Arc<dyn EmbeddingClient>,
        settings: IndexSettings,
    ) -> Result<Self, IndexingError> {
        let store = build_store(&settings.backend)?;
        Self::new(embedder, store, settings)
    }

    /// Settings in effect.
    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Split documents into overlapping chunks.
    pub fn chunk(&self, documents: &[NormalizedDocument]) -> Result<Vec<Chunk>, IndexingError> {
        let chunks = chunk_documents(
            documents,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
            &self.counter,
        )?;
        tracing::debug!(
            documents = documents.len(),
            chunks = chunks.len(),
            chunk_size = self.settings.chunk_size,
            overlap = self.settings.chunk_overlap,
            unit = ?self.settings.chunk_unit,
            "Documents chunked"
        );
        Ok(chunks)
    }

    /// Embed and insert non-empty chunks into the configured collection.
    ///
    /// Fails with [`IndexingError::NoExtractableContent`] when every chunk is blank.
    pub async fn build_index(&self, chunks: Vec<Chunk>) -> Result<VectorIndex, IndexingError> {
        let total = chunks.len();
        let chunks = filter_empty_chunks(chunks);
        if chunks.is_empty() {
            tracing::warn!(total, "No extractable text in chunks");
            return Err(IndexingError::NoExtractableContent);
        }

        let collection = self.settings.effective_collection().to_string();
        let batch_size = self.settings.embedding_batch_size.max(1);
        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.generate_embeddings(texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingClientError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))
                .into());
            }
            records.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddedChunk { chunk, vector }),
            );
        }

        let inserted = self.store.insert(&collection, records).await?;
        tracing::info!(
            collection = %collection,
            chunks = inserted,
            skipped_empty = total - chunks.len(),
            "Index built"
        );

        Ok(VectorIndex {
            collection,
            store: self.store.clone(),
        })
    }

    /// Reopen the persisted collection. `Ok(None)` when nothing has been persisted.
    pub async fn load_index(&self) -> Result<Option<VectorIndex>, IndexingError> {
        if matches!(
            self.settings.backend,
            VectorBackend::Local(IndexPersistence::Ephemeral)
        ) {
            return Ok(None);
        }

        let collection = self.settings.effective_collection().to_string();
        match self.store.open(&collection).await {
            Ok(true) => Ok(Some(VectorIndex {
                collection,
                store: self.store.clone(),
            })),
            Ok(false) => {
                tracing::debug!(collection = %collection, "No persisted index found");
                Ok(None)
            }
            Err(VectorStoreError::Corrupt { path, message }) => {
                tracing::warn!(path = %path.display(), message, "Ignoring corrupt persisted index");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Return up to `k` chunks most similar to `query`, best first.
    ///
    /// Retrieval failures are logged and yield an empty result.
    pub async fn search(&self, index: &VectorIndex, query: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let vector = match self.embedder.generate_embeddings(vec![query.to_string()]).await {
            Ok(mut vectors) => match vectors.pop() {
                Some(vector) => vector,
                None => {
                    tracing::error!("Embedding provider returned no vector for query");
                    return Vec::new();
                }
            },
            Err(error) => {
                tracing::error!(error = %error, "Failed to embed search query");
                return Vec::new();
            }
        };

        match index.store.query(&index.collection, &vector, k).await {
            Ok(mut hits) => {
                hits.truncate(k);
                tracing::debug!(collection = %index.collection, k, hits = hits.len(), "Search completed");
                hits
            }
            Err(error) => {
                tracing::error!(collection = %index.collection, error = %error, "Search failed");
                Vec::new()
            }
        }
    }
}

/// Drop chunks whose text is empty after trimming.
pub fn filter_empty_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| !chunk.text.trim().is_empty())
        .collect()
}

/// Construct the vector store selected by configuration.
pub fn build_store(backend: &VectorBackend) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match backend {
        VectorBackend::Local(persistence) => {
            Ok(Arc::new(LocalVectorStore::new(persistence.clone())))
        }
        VectorBackend::Qdrant { url, api_key } => {
            Ok(Arc::new(QdrantStore::new(url, api_key.clone())?))
        }
    }
}

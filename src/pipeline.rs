//! End-to-end pipeline shared by the HTTP API and the CLI.
//!
//! [`RagPipeline`] owns one instance of each stage and the index built from the most recent
//! upload. Ingestion calls are serialized; questions run concurrently against the current index.

use crate::agent::{
    AgentError, AgentResponse, ChatClient, ChatClientError, ConversationStore,
    FileConversationStore, InMemoryConversationStore, IndexRetriever, OpenRouterChatClient,
    RagAgent,
};
use crate::config::{Config, ConverterBackend};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, OpenAiCompatibleEmbeddings};
use crate::indexing::{IndexingError, IndexingService, VectorIndex};
use crate::ingestion::{
    ConversionError, DoclingConverter, DocumentConverter, IngestionFailure, IngestionService,
    LocalConverter, UploadedFile,
};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every upload in the batch failed to ingest.
    #[error("none of the uploaded files could be ingested")]
    NothingIngested {
        /// Per-file reasons.
        failures: Vec<IngestionFailure>,
    },
    /// No index has been built or persisted yet.
    #[error("no documents have been indexed yet; upload documents first")]
    NoIndex,
    /// Chunking, embedding, or storage failed.
    #[error(transparent)]
    Indexing(#[from] IndexingError),
    /// Answer generation failed.
    #[error(transparent)]
    Agent(#[from] AgentError),
    /// The configured converter could not be constructed.
    #[error("failed to initialise converter: {0}")]
    Converter(#[from] ConversionError),
    /// The embedding client could not be constructed.
    #[error("failed to initialise embeddings: {0}")]
    Embeddings(#[from] EmbeddingClientError),
    /// The chat client could not be constructed.
    #[error("failed to initialise chat client: {0}")]
    Chat(#[from] ChatClientError),
}

/// Summary of one successfully ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedDocument {
    /// Sanitized filename.
    pub filename: String,
    /// Directory holding the document's artifacts.
    pub output_dir: String,
    /// Length of the normalized text in characters.
    pub characters: usize,
}

/// Result of an upload: what was ingested, what was skipped, and how many chunks were stored.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Documents that reached the index.
    pub documents: Vec<IngestedDocument>,
    /// Uploads skipped with their reasons.
    pub failures: Vec<IngestionFailure>,
    /// Non-empty chunks written to the vector store.
    pub chunks_indexed: usize,
    /// Collection the chunks were written to.
    pub collection: String,
}

/// Operations exposed to the outer surfaces.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Ingest, chunk, embed, and index a batch of uploads.
    async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestReport, PipelineError>;

    /// Answer a question against the current index.
    async fn ask(
        &self,
        question: &str,
        thread_id: Option<&str>,
    ) -> Result<AgentResponse, PipelineError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Ingestion, indexing, and the agent wired together.
pub struct RagPipeline {
    ingestion: IngestionService,
    indexing: Arc<IndexingService>,
    agent: RagAgent,
    metrics: Arc<PipelineMetrics>,
    index: RwLock<Option<VectorIndex>>,
    ingest_lock: Mutex<()>,
}

impl RagPipeline {
    /// Assemble a pipeline from already constructed stages.
    pub fn new(
        ingestion: IngestionService,
        indexing: Arc<IndexingService>,
        agent: RagAgent,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            ingestion,
            indexing,
            agent,
            metrics,
            index: RwLock::new(None),
            ingest_lock: Mutex::new(()),
        }
    }

    /// Build every stage from configuration.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let converter: Arc<dyn DocumentConverter> = match &config.ingestion.converter {
            ConverterBackend::Local => Arc::new(LocalConverter::new()),
            ConverterBackend::Docling { url } => Arc::new(DoclingConverter::new(url.clone())?),
        };
        let ingestion = IngestionService::from_settings(converter, config.ingestion.clone());

        let embedder: Arc<dyn EmbeddingClient> = Arc::new(OpenAiCompatibleEmbeddings::new(
            &config.provider,
            config.index.embedding_model.clone(),
        )?);
        let indexing = Arc::new(IndexingService::from_settings(
            embedder,
            config.index.clone(),
        )?);

        let chat: Arc<dyn ChatClient> =
            Arc::new(OpenRouterChatClient::new(&config.provider, &config.agent)?);
        let memory: Arc<dyn ConversationStore> = match &config.agent.conversation_dir {
            Some(directory) => Arc::new(FileConversationStore::new(directory.clone())),
            None => Arc::new(InMemoryConversationStore::new()),
        };
        let agent = RagAgent::new(
            chat,
            Some(memory),
            config.agent.clone(),
            config.index.k,
        );

        tracing::info!(
            converter = ?config.ingestion.converter,
            backend = ?config.index.backend,
            collection = config.index.effective_collection(),
            mode = ?config.agent.mode,
            "Pipeline assembled"
        );
        Ok(Self::new(
            ingestion,
            indexing,
            agent,
            Arc::new(PipelineMetrics::new()),
        ))
    }

    /// Reopen a previously persisted index. Returns whether one was found.
    pub async fn restore_index(&self) -> Result<bool, PipelineError> {
        let restored = self.indexing.load_index().await?;
        let found = restored.is_some();
        if let Some(index) = restored {
            tracing::info!(collection = index.collection(), "Restored persisted index");
            *self.index.write().await = Some(index);
        }
        Ok(found)
    }

    async fn current_index(&self) -> Result<VectorIndex, PipelineError> {
        if let Some(index) = self.index.read().await.clone() {
            return Ok(index);
        }
        if self.restore_index().await?
            && let Some(index) = self.index.read().await.clone()
        {
            return Ok(index);
        }
        Err(PipelineError::NoIndex)
    }
}

#[async_trait]
impl PipelineApi for RagPipeline {
    async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestReport, PipelineError> {
        let _guard = self.ingest_lock.lock().await;

        let batch = self.ingestion.process(files).await;
        self.metrics.record_ingestion(
            batch.documents.len() as u64,
            batch.failures.len() as u64,
        );
        if batch.documents.is_empty() {
            return Err(PipelineError::NothingIngested {
                failures: batch.failures,
            });
        }

        let chunks = self.indexing.chunk(&batch.documents)?;
        let chunks_indexed = chunks
            .iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .count();
        let index = self.indexing.build_index(chunks).await?;
        self.metrics.record_indexed(chunks_indexed as u64);

        let report = IngestReport {
            documents: batch
                .documents
                .iter()
                .map(|document| IngestedDocument {
                    filename: document.metadata.filename.clone(),
                    output_dir: document.metadata.output_dir.clone(),
                    characters: document.text.chars().count(),
                })
                .collect(),
            failures: batch.failures,
            chunks_indexed,
            collection: index.collection().to_string(),
        };
        *self.index.write().await = Some(index);
        Ok(report)
    }

    async fn ask(
        &self,
        question: &str,
        thread_id: Option<&str>,
    ) -> Result<AgentResponse, PipelineError> {
        let index = self.current_index().await?;
        let retriever = IndexRetriever::new(self.indexing.clone(), index);
        let response = self.agent.answer(question, &retriever, thread_id).await?;
        self.metrics.record_query(response.searches as u64);
        Ok(response)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

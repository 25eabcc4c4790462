use async_trait::async_trait;
use docrag::agent::chat::{FunctionCall, ToolCall};
use docrag::agent::{
    ChatClient, ChatClientError, ChatMessage, ConversationStore, InMemoryConversationStore,
    REFUSAL_SENTENCE, RagAgent, Role,
};
use docrag::config::{
    AgentMode, AgentSettings, ChunkUnit, ConverterBackend, IndexPersistence, IndexSettings,
    IngestionSettings, VectorBackend,
};
use docrag::embedding::{EmbeddingClient, EmbeddingClientError};
use docrag::indexing::{IndexingError, IndexingService, LocalVectorStore};
use docrag::ingestion::{
    Conversion, ConversionError, ConversionOptions, DocumentConverter, IngestionService,
    OcrError, OcrFallback, PageImage, PageOcr, PageRasterizer, RasterizedPages, SourceFormat,
    UploadedFile,
};
use docrag::metrics::PipelineMetrics;
use docrag::pipeline::{PipelineApi, PipelineError, RagPipeline};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const REFUND_POLICY: &str = "Refund policy. Customers may request a refund within thirty days \
of purchase. Refunds are issued to the original payment method after the returned item has \
been inspected by the warehouse team.";

const SHIPPING_GUIDE: &str = "Shipping guide. Orders leave the warehouse within two business \
days. Express delivery is available for an additional fee in most regions.";

/// Reads text uploads verbatim, returns no text for images, rejects everything else.
struct FakeConverter;

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn convert(
        &self,
        path: &Path,
        content_type: &str,
        _options: &ConversionOptions,
    ) -> Result<Conversion, ConversionError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("txt") | Some("md") => {
                let markdown = tokio::fs::read_to_string(path).await.map_err(|source| {
                    ConversionError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                Ok(Conversion {
                    structure: Some(json!({ "format": "text", "blocks": [markdown.clone()] })),
                    markdown,
                })
            }
            Some("png") => Ok(Conversion {
                markdown: String::new(),
                structure: None,
            }),
            _ => Err(ConversionError::UnsupportedContentType(
                content_type.to_string(),
            )),
        }
    }
}

/// Letter-frequency vectors: deterministic and good enough to rank lexical overlap.
struct LetterEmbedder {
    fail: AtomicBool,
}

impl LetterEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl EmbeddingClient for LetterEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingClientError::ProviderUnavailable(
                "embedding provider offline".into(),
            ));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0_f32; 27];
                vector[26] = 1.0;
                for c in text.chars().filter(char::is_ascii_alphabetic) {
                    vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

struct SinglePage;

#[async_trait]
impl PageRasterizer for SinglePage {
    async fn rasterize(
        &self,
        source: &Path,
        _format: SourceFormat,
        _max_pages: usize,
        _dpi: u32,
    ) -> Result<RasterizedPages, OcrError> {
        Ok(RasterizedPages::borrowed(vec![PageImage {
            page_number: 1,
            path: source.to_path_buf(),
        }]))
    }
}

struct InvoiceOcr;

#[async_trait]
impl PageOcr for InvoiceOcr {
    async fn recognize(&self, _page: &PageImage) -> Result<Vec<String>, OcrError> {
        Ok(vec![
            "Invoice 2024-117".to_string(),
            "Total due: 420 EUR by 1 March".to_string(),
        ])
    }
}

/// Searches once with the user's question, then answers citing the first retrieved source.
#[derive(Default)]
struct CitingChat {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatClient for CitingChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatMessage, ChatClientError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        let last = messages.last().expect("at least one message");

        if !tools.is_empty() && last.role == Role::User {
            let query = last.content.clone().unwrap_or_default();
            return Ok(ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: "search_documents".into(),
                        arguments: json!({ "query": query }).to_string(),
                    },
                }],
                tool_call_id: None,
            });
        }

        let cited = messages
            .iter()
            .rev()
            .filter(|message| message.role == Role::Tool)
            .filter_map(|message| message.content.as_deref())
            .find_map(|content| {
                let line = content.lines().find(|line| line.starts_with("[1] Source: "))?;
                let rest = line.trim_start_matches("[1] Source: ");
                rest.split(" (chunk").next().map(str::to_string)
            });
        Ok(ChatMessage::assistant(match cited {
            Some(filename) => format!("Refunds are accepted within thirty days [{filename}]."),
            None => REFUSAL_SENTENCE.to_string(),
        }))
    }
}

struct Harness {
    _workspace: TempDir,
    output_root: PathBuf,
    index_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        Self {
            output_root: workspace.path().join("outputs"),
            index_dir: workspace.path().join("chroma_db"),
            _workspace: workspace,
        }
    }

    fn ingestion_settings(&self, force_ocr: bool) -> IngestionSettings {
        IngestionSettings {
            output_root: self.output_root.clone(),
            converter: ConverterBackend::Local,
            force_ocr,
            ocr_max_pages: 5,
            ocr_dpi: 300,
            ocr_language: "eng".into(),
        }
    }

    fn index_settings(&self, persistence: IndexPersistence) -> IndexSettings {
        IndexSettings {
            embedding_model: "text-embedding-3-small".into(),
            embedding_batch_size: 4,
            chunk_size: 120,
            chunk_overlap: 20,
            chunk_unit: ChunkUnit::Characters,
            backend: VectorBackend::Local(persistence),
            collection_name: "documents".into(),
            k: 3,
        }
    }

    fn persistent(&self) -> IndexPersistence {
        IndexPersistence::Persistent {
            directory: self.index_dir.clone(),
        }
    }

    fn indexing(
        &self,
        embedder: Arc<LetterEmbedder>,
        persistence: IndexPersistence,
    ) -> Arc<IndexingService> {
        let store = Arc::new(LocalVectorStore::new(persistence.clone()));
        Arc::new(
            IndexingService::new(embedder, store, self.index_settings(persistence))
                .expect("indexing service"),
        )
    }

    fn pipeline(
        &self,
        force_ocr: bool,
        persistence: IndexPersistence,
        chat: Arc<CitingChat>,
    ) -> RagPipeline {
        let ocr = OcrFallback::new(Arc::new(SinglePage), Arc::new(InvoiceOcr), 5, 300);
        let ingestion = IngestionService::new(
            Arc::new(FakeConverter),
            Some(ocr),
            self.ingestion_settings(force_ocr),
        );
        let indexing = self.indexing(LetterEmbedder::new(), persistence);
        let memory: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let agent = RagAgent::new(
            chat,
            Some(memory),
            AgentSettings {
                model_name: "test-model".into(),
                temperature: 0.0,
                zero_data_retention: true,
                mode: AgentMode::ToolCalling,
                max_steps: 3,
                memory_enabled: true,
                conversation_dir: None,
            },
            3,
        );
        RagPipeline::new(ingestion, indexing, agent, Arc::new(PipelineMetrics::new()))
    }
}

fn text_upload(name: &str, body: &str) -> UploadedFile {
    UploadedFile::new(name, "text/plain", body.as_bytes().to_vec())
}

#[tokio::test]
async fn one_failing_upload_does_not_stop_the_batch() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(false, IndexPersistence::Ephemeral, Arc::default());

    let report = pipeline
        .ingest(vec![
            text_upload("refund-policy.txt", REFUND_POLICY),
            UploadedFile::new("broken.bin", "application/octet-stream", vec![0_u8, 1, 2]),
            text_upload("shipping.txt", SHIPPING_GUIDE),
        ])
        .await
        .expect("ingest");

    let names: Vec<_> = report.documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, ["refund-policy.txt", "shipping.txt"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].filename, "broken.bin");
    assert!(report.chunks_indexed >= 2);

    let doc_dir = harness.output_root.join("refund-policy");
    assert!(doc_dir.join("refund-policy.txt").exists());
    assert!(doc_dir.join("document.md").exists());
    assert!(doc_dir.join("document.json").exists());

    let metrics = pipeline.metrics_snapshot();
    assert_eq!(metrics.documents_ingested, 2);
    assert_eq!(metrics.ingestion_failures, 1);
    assert_eq!(metrics.chunks_indexed, report.chunks_indexed as u64);
}

#[tokio::test]
async fn a_batch_where_every_file_fails_reports_the_failures() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(false, IndexPersistence::Ephemeral, Arc::default());

    let error = pipeline
        .ingest(vec![UploadedFile::new("a.bin", "", vec![1_u8])])
        .await
        .expect_err("nothing ingested");

    match error {
        PipelineError::NothingIngested { failures } => assert_eq!(failures.len(), 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn image_scan_without_force_ocr_has_no_extractable_content() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(false, IndexPersistence::Ephemeral, Arc::default());

    let error = pipeline
        .ingest(vec![UploadedFile::new("scan.png", "image/png", vec![0x89, b'P', b'N', b'G'])])
        .await
        .expect_err("empty index");

    assert!(matches!(
        error,
        PipelineError::Indexing(IndexingError::NoExtractableContent)
    ));
    assert!(error.to_string().contains("FORCE_OCR"));
    assert!(!harness.output_root.join("scan").join("ocr_document.txt").exists());
}

#[tokio::test]
async fn force_ocr_replaces_sparse_markdown_with_recognized_text() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(true, harness.persistent(), Arc::default());

    let report = pipeline
        .ingest(vec![UploadedFile::new("invoice.png", "image/png", vec![0x89, b'P', b'N', b'G'])])
        .await
        .expect("ocr rescued the upload");
    assert_eq!(report.chunks_indexed, 1);

    let doc_dir = harness.output_root.join("invoice");
    let ocr_text = std::fs::read_to_string(doc_dir.join("ocr_document.txt")).expect("ocr artifact");
    assert_eq!(ocr_text, "Invoice 2024-117\nTotal due: 420 EUR by 1 March");
    assert_eq!(
        std::fs::read_to_string(doc_dir.join("document.md")).expect("markdown artifact"),
        ""
    );

    let indexing = harness.indexing(LetterEmbedder::new(), harness.persistent());
    let index = indexing
        .load_index()
        .await
        .expect("load")
        .expect("persisted index");
    let hits = indexing.search(&index, "total due", 3).await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].chunk.text.contains("420 EUR"));
}

#[tokio::test]
async fn search_is_bounded_by_k_and_empty_on_failure() {
    let harness = Harness::new();
    let embedder = LetterEmbedder::new();
    let indexing = harness.indexing(embedder.clone(), IndexPersistence::Ephemeral);
    let ingestion = IngestionService::new(
        Arc::new(FakeConverter),
        None,
        harness.ingestion_settings(false),
    );

    let batch = ingestion
        .process(vec![
            text_upload("refund-policy.txt", REFUND_POLICY),
            text_upload("shipping.txt", SHIPPING_GUIDE),
        ])
        .await;
    let chunks = indexing.chunk(&batch.documents).expect("chunks");
    assert!(chunks.len() > 2);
    let index = indexing.build_index(chunks).await.expect("index");

    let hits = indexing.search(&index, "refund within thirty days", 2).await;
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
    assert!(indexing.search(&index, "refund", 0).await.is_empty());
    assert!(indexing.search(&index, "   ", 2).await.is_empty());

    embedder.fail.store(true, Ordering::SeqCst);
    assert!(indexing.search(&index, "refund", 2).await.is_empty());
}

#[tokio::test]
async fn load_index_is_absent_until_something_is_persisted() {
    let harness = Harness::new();
    let indexing = harness.indexing(LetterEmbedder::new(), harness.persistent());
    assert!(indexing.load_index().await.expect("load").is_none());

    let ephemeral = harness.indexing(LetterEmbedder::new(), IndexPersistence::Ephemeral);
    assert!(ephemeral.load_index().await.expect("load").is_none());
}

#[tokio::test]
async fn chunking_is_deterministic_across_runs() {
    let harness = Harness::new();
    let ingestion = IngestionService::new(
        Arc::new(FakeConverter),
        None,
        harness.ingestion_settings(false),
    );
    let batch = ingestion
        .process(vec![text_upload("refund-policy.txt", REFUND_POLICY)])
        .await;
    let indexing = harness.indexing(LetterEmbedder::new(), IndexPersistence::Ephemeral);

    let first = indexing.chunk(&batch.documents).expect("chunks");
    let second = indexing.chunk(&batch.documents).expect("chunks");

    assert_eq!(first, second);
    assert!(first.iter().all(|chunk| chunk.text.chars().count() <= 120));
    assert!(
        first
            .iter()
            .enumerate()
            .all(|(i, chunk)| chunk.metadata.chunk_index == i
                && chunk.metadata.document.filename == "refund-policy.txt")
    );
}

#[tokio::test]
async fn answers_cite_the_retrieved_document() {
    let harness = Harness::new();
    let chat = Arc::new(CitingChat::default());
    let pipeline = harness.pipeline(false, IndexPersistence::Ephemeral, chat.clone());
    pipeline
        .ingest(vec![text_upload("refund-policy.txt", REFUND_POLICY)])
        .await
        .expect("ingest");

    let response = pipeline
        .ask("How long do customers have to request a refund?", None)
        .await
        .expect("answer");

    assert!(response.answer.contains("[refund-policy.txt]"));
    assert_eq!(response.sources, vec!["refund-policy.txt".to_string()]);
    assert_eq!(response.searches, 1);
    let thread_id = response.thread_id.expect("memory assigns a thread");

    let follow_up = pipeline
        .ask("And how is it paid back?", Some(&thread_id))
        .await
        .expect("follow-up");
    assert_eq!(follow_up.thread_id.as_deref(), Some(thread_id.as_str()));

    let calls = chat.calls.lock().expect("calls lock");
    let replayed = calls.last().expect("follow-up call");
    assert!(replayed.iter().any(|message| {
        message.role == Role::User
            && message.content.as_deref()
                == Some("How long do customers have to request a refund?")
    }));

    let metrics = pipeline.metrics_snapshot();
    assert_eq!(metrics.queries_answered, 2);
    assert_eq!(metrics.searches_performed, 2);
}

#[tokio::test]
async fn questions_before_any_upload_have_no_index() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(false, IndexPersistence::Ephemeral, Arc::default());

    let error = pipeline.ask("anything?", None).await.expect_err("no index");
    assert!(matches!(error, PipelineError::NoIndex));
}

#[tokio::test]
async fn a_new_pipeline_reopens_the_persisted_index() {
    let harness = Harness::new();
    harness
        .pipeline(false, harness.persistent(), Arc::default())
        .ingest(vec![text_upload("refund-policy.txt", REFUND_POLICY)])
        .await
        .expect("ingest");

    let restarted = harness.pipeline(false, harness.persistent(), Arc::default());
    let response = restarted
        .ask("What is the refund window?", None)
        .await
        .expect("answer from persisted index");
    assert_eq!(response.sources, vec!["refund-policy.txt".to_string()]);
}

#[tokio::test]
async fn reingesting_a_file_replaces_its_chunks() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(false, harness.persistent(), Arc::default());
    pipeline
        .ingest(vec![text_upload("refund-policy.txt", REFUND_POLICY)])
        .await
        .expect("first ingest");
    let report = pipeline
        .ingest(vec![text_upload("refund-policy.txt", "Refunds are no longer offered.")])
        .await
        .expect("second ingest");
    assert_eq!(report.chunks_indexed, 1);

    let indexing = harness.indexing(LetterEmbedder::new(), harness.persistent());
    let index = indexing
        .load_index()
        .await
        .expect("load")
        .expect("persisted index");
    assert_eq!(index.len().await.expect("count"), 1);
}

#[tokio::test]
async fn separate_indexing_runs_accumulate_in_the_persisted_collection() {
    let harness = Harness::new();
    let ingestion = IngestionService::new(
        Arc::new(FakeConverter),
        None,
        harness.ingestion_settings(false),
    );

    for (name, body) in [("a.txt", "Alpha team notes."), ("b.txt", "Beta team notes.")] {
        let batch = ingestion.process(vec![text_upload(name, body)]).await;
        let indexing = harness.indexing(LetterEmbedder::new(), harness.persistent());
        let chunks = indexing.chunk(&batch.documents).expect("chunks");
        indexing.build_index(chunks).await.expect("index");
    }

    let reader = harness.indexing(LetterEmbedder::new(), harness.persistent());
    let index = reader
        .load_index()
        .await
        .expect("load")
        .expect("persisted index");
    assert_eq!(index.len().await.expect("count"), 2);

    let mut sources: Vec<String> = reader
        .search(&index, "team notes", 5)
        .await
        .into_iter()
        .map(|hit| hit.chunk.metadata.document.source)
        .collect();
    sources.sort();
    assert_eq!(sources, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[tokio::test]
async fn a_restarted_pipeline_keeps_earlier_uploads_when_ingesting() {
    let harness = Harness::new();
    for (name, body) in [("a.txt", "Alpha team notes."), ("b.txt", "Beta team notes.")] {
        let report = harness
            .pipeline(false, harness.persistent(), Arc::default())
            .ingest(vec![text_upload(name, body)])
            .await
            .expect("ingest");
        assert_eq!(report.chunks_indexed, 1);
    }

    let index = harness
        .indexing(LetterEmbedder::new(), harness.persistent())
        .load_index()
        .await
        .expect("load")
        .expect("persisted index");
    assert_eq!(index.len().await.expect("count"), 2);
}

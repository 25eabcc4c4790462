//! HTTP surface for docrag.
//!
//! - `POST /documents` – Multipart upload of one or more files. Each file is converted, chunked,
//!   embedded, and indexed; the response lists ingested documents, skipped files, and the number
//!   of chunks stored.
//! - `POST /query` – Ask a question against the indexed documents, optionally continuing a
//!   conversation thread.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog.

use crate::agent::{AgentError, ConversationStoreError};
use crate::indexing::IndexingError;
use crate::ingestion::UploadedFile;
use crate::pipeline::{PipelineApi, PipelineError};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router over a pipeline implementation.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route(
            "/documents",
            post(upload_documents::<S>).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/query", post(query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Ingest every file part of a multipart upload.
async fn upload_documents<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Response, AppError>
where
    S: PipelineApi,
{
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        files.push(UploadedFile::new(filename, content_type, bytes.to_vec()));
    }
    if files.is_empty() {
        return Err(AppError::BadRequest(
            "request contained no file parts".to_string(),
        ));
    }

    let uploaded = files.len();
    let report = service.ingest(files).await?;
    tracing::info!(
        uploaded,
        ingested = report.documents.len(),
        failed = report.failures.len(),
        chunks = report.chunks_indexed,
        collection = %report.collection,
        "Upload completed"
    );
    Ok(Json(report).into_response())
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    thread_id: Option<String>,
}

/// Answer a question from the indexed documents.
async fn query<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, AppError>
where
    S: PipelineApi,
{
    let response = service
        .ask(&request.question, request.thread_id.as_deref())
        .await?;
    tracing::info!(
        searches = response.searches,
        sources = response.sources.len(),
        "Query answered"
    );
    Ok(Json(response).into_response())
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Response
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot()).into_response()
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload_documents",
                method: "POST",
                path: "/documents",
                description: "Multipart upload (any field name, one part per file). Converts, chunks, embeds, and indexes the files; returns { documents, failures, chunks_indexed, collection }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Answer a question from the indexed documents. Returns { answer, sources, searches, thread_id }.",
                request_example: Some(json!({
                    "question": "What does the contract say about termination?",
                    "thread_id": "optional-thread-id"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and query counters.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    BadRequest(String),
    Pipeline(PipelineError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Pipeline(error) => match error {
                PipelineError::NothingIngested { .. }
                | PipelineError::Indexing(IndexingError::NoExtractableContent) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::NoIndex => StatusCode::CONFLICT,
                PipelineError::Agent(AgentError::EmptyQuestion) => StatusCode::BAD_REQUEST,
                PipelineError::Agent(AgentError::Memory(ConversationStoreError::InvalidThreadId(
                    _,
                ))) => StatusCode::BAD_REQUEST,
                PipelineError::Agent(AgentError::Chat(_))
                | PipelineError::Indexing(IndexingError::Embedding(_)) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(message) => json!({ "error": message }),
            Self::Pipeline(PipelineError::NothingIngested { failures }) => json!({
                "error": "none of the uploaded files could be ingested",
                "failures": failures,
            }),
            Self::Pipeline(error) => {
                if status.is_server_error() {
                    tracing::error!(%error, "Request failed");
                }
                json!({ "error": error.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::BadRequest(inner.body_text())
    }
}

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL_NAME: &str = "meta-llama/llama-3.1-8b-instruct";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_COLLECTION_NAME: &str = "documents";
/// Collection name used when the local index lives only in memory.
pub const EPHEMERAL_COLLECTION_NAME: &str = "documents_in_memory";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docrag pipeline, grouped by stage.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credentials and endpoint shared by the embedding and generation providers.
    pub provider: ProviderSettings,
    /// Document conversion and OCR settings.
    pub ingestion: IngestionSettings,
    /// Chunking, embedding, and vector store settings.
    pub index: IndexSettings,
    /// Generation model and agent behavior.
    pub agent: AgentSettings,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Provider endpoint shared by embeddings and chat completions.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Bearer token read from `OPENROUTER_API_KEY`.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
}

/// Which converter turns uploaded files into markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConverterBackend {
    /// In-process extraction (PDF text layer, OOXML, plain text).
    Local,
    /// Remote docling-serve instance.
    Docling {
        /// Base URL of the docling-serve API.
        url: String,
    },
}

/// Settings consumed by [`crate::ingestion::IngestionService`].
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Root directory receiving one subdirectory per ingested document.
    pub output_root: PathBuf,
    /// Converter used for the primary conversion.
    pub converter: ConverterBackend,
    /// Enables the OCR fallback and the higher image scale.
    pub force_ocr: bool,
    /// Upper bound on pages rasterized by the OCR fallback.
    pub ocr_max_pages: usize,
    /// Rasterization resolution for the OCR fallback.
    pub ocr_dpi: u32,
    /// Tesseract language pack.
    pub ocr_language: String,
}

impl IngestionSettings {
    /// Image scale requested from the converter.
    pub fn images_scale(&self) -> f32 {
        if self.force_ocr { 2.0 } else { 1.0 }
    }
}

/// How chunk length is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUnit {
    /// Unicode scalar values, matching a `len()`-based splitter.
    Characters,
    /// Tokens of the embedding model's tokenizer.
    Tokens,
}

/// Whether the local vector index is written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPersistence {
    /// Collections are flushed to `<directory>/<collection>.json`.
    Persistent {
        /// Directory holding persisted collections.
        directory: PathBuf,
    },
    /// Collections exist for the lifetime of the process only.
    Ephemeral,
}

/// Vector store backing the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorBackend {
    /// In-process brute-force store.
    Local(IndexPersistence),
    /// Remote Qdrant instance.
    Qdrant {
        /// Base URL of the Qdrant REST API.
        url: String,
        /// Optional API key sent as `api-key`.
        api_key: Option<String>,
    },
}

/// Settings consumed by [`crate::indexing::IndexingService`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Maximum number of texts per embeddings request.
    pub embedding_batch_size: usize,
    /// Maximum chunk length.
    pub chunk_size: usize,
    /// Overlap carried from the previous chunk; always smaller than `chunk_size`.
    pub chunk_overlap: usize,
    /// Unit used to measure chunk length.
    pub chunk_unit: ChunkUnit,
    /// Vector store selection.
    pub backend: VectorBackend,
    /// Collection used when the index is persisted or remote.
    pub collection_name: String,
    /// Number of chunks retrieved per query.
    pub k: usize,
}

impl IndexSettings {
    /// Collection name in effect for the configured backend.
    pub fn effective_collection(&self) -> &str {
        match &self.backend {
            VectorBackend::Local(IndexPersistence::Ephemeral) => EPHEMERAL_COLLECTION_NAME,
            _ => &self.collection_name,
        }
    }
}

/// How the agent obtains retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// The model receives a `search_documents` tool and decides when to call it.
    ToolCalling,
    /// Retrieval runs once before the model and the context is injected.
    FixedRetrieval,
}

/// Settings consumed by [`crate::agent::RagAgent`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Generation model identifier.
    pub model_name: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Ask the provider to route only to zero-data-retention endpoints.
    pub zero_data_retention: bool,
    /// Tool-calling vs. fixed-retrieval operation.
    pub mode: AgentMode,
    /// Maximum tool rounds per user turn.
    pub max_steps: usize,
    /// Replay prior turns keyed by thread id.
    pub memory_enabled: bool,
    /// Directory for persisted conversations; in-memory when `None`.
    pub conversation_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size: usize = parse_or("CHUNK_SIZE", 3000)?;
        let chunk_overlap: usize = parse_or("CHUNK_OVERLAP", 200)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }
        let k: usize = parse_or("RETRIEVAL_K", 4)?;
        if k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_K".into()));
        }

        Ok(Self {
            provider: ProviderSettings {
                api_key: load_env("OPENROUTER_API_KEY")?,
                base_url: load_env_optional("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            },
            ingestion: IngestionSettings {
                output_root: load_env_optional("OUTPUT_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("outputs")),
                converter: load_converter()?,
                force_ocr: parse_bool_or("FORCE_OCR", false)?,
                ocr_max_pages: parse_or("OCR_MAX_PAGES", 20)?,
                ocr_dpi: parse_or("OCR_DPI", 300)?,
                ocr_language: load_env_optional("OCR_LANGUAGE").unwrap_or_else(|| "eng".into()),
            },
            index: IndexSettings {
                embedding_model: load_env_optional("EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                embedding_batch_size: parse_or::<usize>("EMBEDDING_BATCH_SIZE", 64)?.max(1),
                chunk_size,
                chunk_overlap,
                chunk_unit: load_env_optional("CHUNK_UNIT")
                    .map(|value| {
                        value
                            .parse()
                            .map_err(|()| ConfigError::InvalidValue("CHUNK_UNIT".into()))
                    })
                    .transpose()?
                    .unwrap_or(ChunkUnit::Characters),
                backend: load_vector_backend()?,
                collection_name: load_env_optional("COLLECTION_NAME")
                    .unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string()),
                k,
            },
            agent: AgentSettings {
                model_name: load_env_optional("MODEL_NAME")
                    .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
                temperature: parse_or("TEMPERATURE", 0.0)?,
                zero_data_retention: parse_bool_or("ZERO_DATA_RETENTION", true)?,
                mode: load_env_optional("AGENT_MODE")
                    .map(|value| {
                        value
                            .parse()
                            .map_err(|()| ConfigError::InvalidValue("AGENT_MODE".into()))
                    })
                    .transpose()?
                    .unwrap_or(AgentMode::ToolCalling),
                max_steps: parse_or::<usize>("AGENT_MAX_STEPS", 4)?.max(1),
                memory_enabled: parse_bool_or("MEMORY_ENABLED", true)?,
                conversation_dir: load_env_optional("CONVERSATION_DIR").map(PathBuf::from),
            },
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn load_converter() -> Result<ConverterBackend, ConfigError> {
    match load_env_optional("CONVERTER")
        .map(|value| value.to_lowercase())
        .as_deref()
    {
        None | Some("local") => Ok(ConverterBackend::Local),
        Some("docling") => Ok(ConverterBackend::Docling {
            url: load_env("DOCLING_URL")?,
        }),
        Some(_) => Err(ConfigError::InvalidValue("CONVERTER".into())),
    }
}

fn load_vector_backend() -> Result<VectorBackend, ConfigError> {
    match load_env_optional("VECTOR_BACKEND")
        .map(|value| value.to_lowercase())
        .as_deref()
    {
        None | Some("local") => {
            let persistence = if parse_bool_or("PERSIST", true)? {
                IndexPersistence::Persistent {
                    directory: load_env_optional("INDEX_DIR")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("chroma_db")),
                }
            } else {
                IndexPersistence::Ephemeral
            };
            Ok(VectorBackend::Local(persistence))
        }
        Some("qdrant") => Ok(VectorBackend::Qdrant {
            url: load_env("QDRANT_URL")?,
            api_key: load_env_optional("QDRANT_API_KEY"),
        }),
        Some(_) => Err(ConfigError::InvalidValue("VECTOR_BACKEND".into())),
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn parse_bool_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        None => Ok(default),
        Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::InvalidValue(key.into())),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl std::str::FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Characters),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tools" | "tool-calling" | "tool_calling" => Ok(Self::ToolCalling),
            "fixed" | "fixed-retrieval" | "fixed_retrieval" => Ok(Self::FixedRetrieval),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated by the binary during process start.
///
/// Library components never read this; they receive their settings explicitly.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        base_url = %config.provider.base_url,
        model = %config.agent.model_name,
        embedding_model = %config.index.embedding_model,
        backend = ?config.index.backend,
        mode = ?config.agent.mode,
        force_ocr = config.ingestion.force_ocr,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

//! Configuration for the knowledge base
//!
//! Loaded from TOML; every section and field has a default so a partial file
//! (or no file at all) yields a working local setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "KNOWLEDGE_RAG_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Metadata database and upload storage
    pub storage: StorageConfig,
    /// Text chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding provider configuration
    pub embeddings: EmbeddingConfig,
    /// Completion provider configuration
    pub llm: LlmConfig,
    /// Vector index configuration
    pub vector_db: VectorDbConfig,
    /// Query-time retrieval settings
    pub retrieval: RetrievalConfig,
    /// Background ingestion settings
    pub processing: ProcessingConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file, apply environment overrides, and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Resolve configuration the way the server binary does: an explicit path,
    /// then `KNOWLEDGE_RAG_CONFIG`, then defaults
    pub fn load(explicit_path: Option<PathBuf>) -> Result<Self> {
        let path = explicit_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply `KNOWLEDGE_RAG_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("KNOWLEDGE_RAG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("KNOWLEDGE_RAG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(dir) = std::env::var("KNOWLEDGE_RAG_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chunk_size == 0 {
            return Err(Error::Config("chunking.max_chunk_size must be positive".into()));
        }
        if self.chunking.overlap_size >= self.chunking.max_chunk_size {
            return Err(Error::Config(format!(
                "chunking.overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.chunking.overlap_size, self.chunking.max_chunk_size
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be positive".into()));
        }
        if self.embeddings.batch_size == 0 || self.embeddings.max_concurrent_batches == 0 {
            return Err(Error::Config(
                "embeddings.batch_size and max_concurrent_batches must be positive".into(),
            ));
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.max_top_k == 0 {
            return Err(Error::Config("retrieval top_k limits must be positive".into()));
        }
        if self.server.max_upload_size == 0 {
            return Err(Error::Config("server.max_upload_size must be positive".into()));
        }
        if self.processing.queue_capacity == 0 {
            return Err(Error::Config("processing.queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 10MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Metadata database and uploaded-bytes storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all persistent state
    pub data_dir: PathBuf,
    /// SQLite file name under `data_dir`
    pub database_file: String,
    /// Upload directory name under `data_dir`
    pub uploads_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("knowledge-rag");

        Self {
            data_dir,
            database_file: "documents.db".to_string(),
            uploads_dir: "uploads".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.data_dir.join(&self.uploads_dir)
    }
}

/// What to do with a document whose extracted text is blank
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyDocumentPolicy {
    /// Mark the document failed with `empty_document`
    #[default]
    Fail,
    /// Mark the document ready with zero chunks
    Ready,
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub overlap_size: usize,
    /// Handling of documents with no text
    pub empty_document_policy: EmptyDocumentPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 200,
            empty_document_policy: EmptyDocumentPolicy::Fail,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local Ollama server
    #[default]
    Ollama,
    /// OpenAI-compatible `/v1/embeddings` endpoint
    OpenAi,
    /// Offline feature hashing, no network
    Hashing,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    /// Provider base URL
    pub base_url: String,
    /// Embedding model name
    pub model: String,
    /// Environment variable holding the API key, if the provider needs one
    pub api_key_env: Option<String>,
    /// Vector dimensionality; fixed for the life of an index
    pub dimensions: usize,
    /// Texts per provider request
    pub batch_size: usize,
    /// Batches in flight at once
    pub max_concurrent_batches: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient failures
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: None,
            dimensions: 768,
            batch_size: 32,
            max_concurrent_batches: 4,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }

    /// API key read from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        read_api_key(self.api_key_env.as_deref())
    }
}

/// Completion backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Ollama,
    OpenAi,
}

/// Completion (answer synthesis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmBackend,
    /// Provider base URL
    pub base_url: String,
    /// Generation model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum tokens in the answer
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmBackend::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            api_key_env: None,
            temperature: 0.3, // Lower for more factual answers
            max_tokens: 500,
            timeout_secs: 120,
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn api_key(&self) -> Option<String> {
        read_api_key(self.api_key_env.as_deref())
    }
}

/// Vector index backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Persistent SQLite-backed index
    #[default]
    Sqlite,
    /// In-process index, rebuilt from stored chunks on startup
    Memory,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    pub backend: IndexBackend,
    /// SQLite file name under the data dir (sqlite backend only)
    pub index_file: String,
    /// Retries for index writes and deletes
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Sqlite,
            index_file: "vectors.db".to_string(),
            max_retries: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl VectorDbConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }
}

/// Query-time retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a count
    pub default_top_k: usize,
    /// Upper clamp for caller-supplied counts
    pub max_top_k: usize,
    /// Index over-fetch multiplier, absorbs hits dropped by visibility filtering
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 50,
            overfetch_factor: 2,
        }
    }
}

/// Background ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Documents ingested at once (default: CPU count, max 8)
    pub parallel_documents: Option<usize>,
    /// Bounded queue capacity
    pub queue_capacity: usize,
    /// Re-enqueue interrupted work and finish interrupted deletions at startup
    pub resume_on_startup: bool,
    /// Upper bound on one document's ingestion, in seconds
    pub document_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_documents: None, // Auto-detect from CPU count
            queue_capacity: 1000,
            resume_on_startup: true,
            document_timeout_secs: 600,
        }
    }
}

impl ProcessingConfig {
    pub fn effective_parallelism(&self) -> usize {
        self.parallel_documents
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}

fn read_api_key(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
        .filter(|key| !key.trim().is_empty())
}

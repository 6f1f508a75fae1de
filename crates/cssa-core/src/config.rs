//! CSSA Configuration Management
//!
//! Handles configuration from environment variables and TOML config files,
//! with defaults suited to a local development setup (embedded store on
//! disk, Ollama for embeddings and chat).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Local embedded vector store
    pub local: LocalStoreConfig,

    /// Managed remote vector index
    pub remote: RemoteIndexConfig,

    /// LLM and embedding provider configuration
    pub llm: LlmConfig,

    /// PDF ingestion settings
    pub ingest: IngestConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Local store
        if let Ok(path) = std::env::var("LOCAL_DB_PATH") {
            self.local.path = PathBuf::from(path);
        }
        if let Ok(collection) = std::env::var("LOCAL_COLLECTION") {
            self.local.collection = collection;
        }

        // Remote index
        if let Ok(provider) = std::env::var("VECTOR_PROVIDER") {
            self.remote.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("PINECONE_API_KEY") {
            self.remote.api_key = Some(key);
        }
        if let Ok(environment) = std::env::var("PINECONE_ENVIRONMENT") {
            self.remote.environment = environment;
        }
        if let Ok(index) = std::env::var("PINECONE_INDEX_NAME") {
            self.remote.index_name = index;
        }
        if let Ok(url) = std::env::var("QDRANT_URL") {
            self.remote.qdrant_url = url;
        }
        if let Ok(dimension) = std::env::var("VECTOR_DIMENSION") {
            self.remote.dimension = dimension.parse().map_err(|_| ConfigError::InvalidValue {
                key: "VECTOR_DIMENSION".to_string(),
                value: dimension,
            })?;
        }

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.llm.openai_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.llm.embedding_model = model;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

/// What the local store does when its backend fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the backend error to the caller
    #[default]
    Propagate,

    /// Log the error and return an empty/zero value instead.
    ///
    /// Callers cannot tell "no results" from "backend failed" under this
    /// policy; it exists for scripts written against that behavior.
    LogAndDefault,
}

/// Local embedded store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// Directory holding the database files
    pub path: PathBuf,

    /// Collection to open (created if absent)
    pub collection: String,

    /// Backend failure handling
    pub error_policy: ErrorPolicy,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chroma_db"),
            collection: "default".to_string(),
            error_policy: ErrorPolicy::Propagate,
        }
    }
}

/// Supported managed index providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorProvider {
    Pinecone,
    Qdrant,
}

impl std::str::FromStr for VectorProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(ConfigError::InvalidValue {
                key: "VECTOR_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Remote index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteIndexConfig {
    /// Index provider
    pub provider: VectorProvider,

    /// API key (Pinecone, or Qdrant Cloud)
    pub api_key: Option<String>,

    /// Environment / region the index lives in
    pub environment: String,

    /// Cloud hosting a serverless Pinecone index
    pub cloud: String,

    /// Index (or Qdrant collection) name
    pub index_name: String,

    /// Vector dimension (must match embedding model)
    pub dimension: usize,

    /// Similarity metric used when creating the index
    pub metric: String,

    /// Qdrant gRPC URL
    pub qdrant_url: String,

    /// Create the index when it does not exist yet
    pub create_if_missing: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            provider: VectorProvider::Pinecone,
            api_key: None,
            environment: "us-east-1".to_string(),
            cloud: "aws".to_string(),
            index_name: "default-index".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            metric: "cosine".to_string(),
            qdrant_url: "http://localhost:6334".to_string(),
            create_if_missing: true,
            timeout_secs: 30,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Chat model name
    pub model: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// PDF ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,

    /// Local collection receiving ingested chunks
    pub collection: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            chunk_overlap: 300,
            collection: "pdf_collection".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl From<ConfigError> for crate::CssaError {
    fn from(err: ConfigError) -> Self {
        crate::CssaError::ConfigError(err.to_string())
    }
}

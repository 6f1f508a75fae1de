//! CSSA Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions shared by the CSSA crates:
//! - Common error types
//! - Documents, vector records and metadata filters
//! - Identifier generation
//! - The LLM client trait
//! - Configuration management
//! - Shared HTTP client construction

pub mod config;
pub mod http;

pub use config::{
    AppConfig, ConfigError, ErrorPolicy, IngestConfig, LlmConfig, LlmProvider, LocalStoreConfig,
    LoggingConfig, RemoteIndexConfig, VectorProvider,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Embedding model shared by every vector backend (Ollama name of all-MiniLM-L6-v2)
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

/// Output dimension of [`DEFAULT_EMBEDDING_MODEL`]
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for CSSA operations
#[derive(Error, Debug)]
pub enum CssaError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CssaError {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Whether the error was raised before reaching any backend
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError(_))
    }
}

pub type Result<T> = std::result::Result<T, CssaError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a fresh random document identifier (UUID v4).
///
/// Identifiers are never derived from content; upserting the same text twice
/// yields two distinct identifiers.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Documents and Vectors
// ============================================================================

/// Metadata attached to a document or vector.
///
/// Values are expected to be scalars (string, number, bool) or lists of
/// strings; backends reject anything else.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A text document owned by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Externally assigned identifier, generated on upsert when absent
    pub id: Option<String>,

    /// Text content
    pub content: String,

    /// Associated metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a new document without identifier or metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A document returned by a search, optionally paired with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,

    /// Similarity score (higher is closer); `None` when not requested
    pub score: Option<f32>,
}

/// The combined (id, embedding, metadata) triple forwarded to a vector backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    /// Create a new vector record
    pub fn new(id: impl Into<String>, values: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            values,
            metadata,
        }
    }
}

/// Metadata equality filter; all conditions must hold
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: Vec<(String, serde_json::Value)>,
}

impl MetadataFilter {
    /// Create an empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value`
    pub fn equals(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Equality conditions in insertion order
    pub fn conditions(&self) -> &[(String, serde_json::Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Check whether a metadata map satisfies every condition
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }

    /// Parse a `key=value` condition, as given on the command line.
    ///
    /// The value is read as a JSON scalar when possible (`year=2024`,
    /// `draft=false`) and as a plain string otherwise.
    pub fn parse_condition(raw: &str) -> Result<(String, serde_json::Value)> {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            CssaError::validation(format!("filter should look like key=value, got '{raw}'"))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(CssaError::validation("filter key should not be empty"));
        }

        let value = value.trim();
        let value = match serde_json::from_str::<serde_json::Value>(value) {
            Ok(v @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_))) => v,
            _ => serde_json::Value::String(value.trim_matches('"').to_string()),
        };

        Ok((key.to_string(), value))
    }
}

// ============================================================================
// LLM Types
// ============================================================================

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for LLM clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a response to a chat conversation.
    ///
    /// Providers without a chat endpoint get the conversation flattened into
    /// a single prompt.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.generate(&prompt).await
    }

    /// Generate a streaming response
    async fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<futures::stream::BoxStream<'static, Result<String>>>;
}

// ============================================================================
// Tests
// ============================================================================

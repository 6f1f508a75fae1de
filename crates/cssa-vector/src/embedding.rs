//! Embedding client for generating vector representations
//!
//! Supports OpenAI and Ollama embedding APIs. The model identity defaults to
//! [`DEFAULT_EMBEDDING_MODEL`] for every backend.

use std::sync::Arc;

use async_trait::async_trait;
use cssa_core::http::http_client;
use cssa_core::{
    CssaError, LlmConfig, LlmProvider, Result, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_EMBEDDING_MODEL,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch), one per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| CssaError::ConfigError("OpenAI API key required".to_string()))?;

        let mut client = Self::new(api_key.clone(), config.embedding_model.clone());
        client.client = http_client(config.timeout_secs)?;
        if let Some(url) = &config.openai_base_url {
            client.base_url = url.clone();
        }
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| CssaError::EmbeddingError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let request = OpenAiEmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CssaError::Unavailable(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CssaError::EmbeddingError(format!(
                "OpenAI embedding error: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            CssaError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        // The API may return items out of order
        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => DEFAULT_EMBEDDING_DIMENSION,
            _ => 768,
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// Create a client for the shared default model
    pub fn with_default_model(base_url: impl Into<String>) -> Self {
        Self::new(base_url, DEFAULT_EMBEDDING_MODEL)
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut client = Self::new(config.ollama_url.clone(), config.embedding_model.clone());
        client.client = http_client(config.timeout_secs)?;
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                CssaError::Unavailable(format!("Ollama embedding request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CssaError::EmbeddingError(format!(
                "Ollama embedding error: {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            CssaError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        Ok(result.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // No batch endpoint; one request per text
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(config: &LlmConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => {
            Ok(Arc::new(OpenAiEmbedding::from_config(config)?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaEmbedding::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_dimension() {
        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-small");
        assert_eq!(client.dimension(), 1536);

        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-large");
        assert_eq!(client.dimension(), 3072);
    }

    #[test]
    fn test_ollama_default_model() {
        let client = OllamaEmbedding::with_default_model("http://localhost:11434/");
        assert_eq!(client.model, "all-minilm");
        assert_eq!(client.dimension(), 384);
        assert_eq!(client.base_url, "http://localhost:11434");

        let client = OllamaEmbedding::new("http://localhost:11434", "mxbai-embed-large");
        assert_eq!(client.dimension(), 1024);
    }

    #[test]
    fn test_factory_requires_openai_key() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAI,
            openai_api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            create_embedding_client(&config),
            Err(CssaError::ConfigError(_))
        ));

        let config = LlmConfig::default();
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.dimension(), 384);
    }

    #[tokio::test]
    async fn test_openai_empty_batch_skips_request() {
        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-small")
            .with_unreachable_base_url();
        let embeddings = client.embed_batch(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }

    impl OpenAiEmbedding {
        fn with_unreachable_base_url(mut self) -> Self {
            self.base_url = "http://127.0.0.1:9".to_string();
            self
        }
    }
}

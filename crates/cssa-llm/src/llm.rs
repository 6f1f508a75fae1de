//! LLM Client implementations
//!
//! Provides abstraction for OpenAI and Ollama LLM APIs
//! with support for plain completion, chat and streaming responses.

use std::sync::Arc;

use async_trait::async_trait;
use cssa_core::http::http_client;
use cssa_core::{ChatMessage, CssaError, LlmClient, LlmConfig, LlmProvider, Result};
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::stream::lines;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

impl From<&ChatMessage> for Message {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

// ============================================================================
// OpenAI Client
// ============================================================================

/// OpenAI API client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

impl OpenAiClient {
    /// Create a new OpenAI client
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| CssaError::ConfigError("OpenAI API key required".to_string()))?;

        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn request(&self, messages: Vec<Message>, stream: Option<bool>) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, request: &OpenAiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| CssaError::Unavailable(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CssaError::LlmError(format!("OpenAI error: {error_text}")));
        }

        Ok(response)
    }
}

/// Content delta carried by one SSE line, if any
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }

    let parsed = serde_json::from_str::<StreamResponse>(data).ok()?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty())
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(model = %self.model, messages = messages.len(), "chat completion");

        let request = self.request(messages.iter().map(Message::from).collect(), None);
        let response = self.send(&request).await?;

        let result: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CssaError::LlmError(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CssaError::LlmError("No response generated".to_string()))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = self.request(
            vec![Message::from(&ChatMessage::user(prompt))],
            Some(true),
        );
        let response = self.send(&request).await?;

        let mapped_stream = lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_sse_line(&line).map(Ok),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(mapped_stream))
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

/// Text carried by one streamed Ollama object, if any
fn parse_ndjson_line(line: &str) -> Option<String> {
    serde_json::from_str::<OllamaResponse>(line)
        .ok()
        .map(|parsed| parsed.response)
        .filter(|response| !response.is_empty())
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut client = Self::new(config.ollama_url.clone(), config.model.clone());
        client.client = http_client(config.timeout_secs)?;
        client.temperature = config.temperature;
        Ok(client)
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| CssaError::Unavailable(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CssaError::LlmError(format!("Ollama error: {error_text}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let result: OllamaResponse = self
            .post("/api/generate", &request)
            .await?
            .json()
            .await
            .map_err(|e| CssaError::LlmError(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.response)
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(model = %self.model, messages = messages.len(), "chat completion");

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Message::from).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let result: OllamaChatResponse = self
            .post("/api/chat", &request)
            .await?
            .json()
            .await
            .map_err(|e| CssaError::LlmError(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.message.content)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self.post("/api/generate", &request).await?;

        // One JSON object per line
        let mapped_stream = lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_ndjson_line(&line).map(Ok),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(mapped_stream))
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM client from config
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => {
            Ok(Arc::new(OpenAiClient::from_config(config)?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaClient::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cssa_core::ChatRole;

    #[test]
    fn test_openai_client_creation() {
        let client = OpenAiClient::new("test-key", "gpt-4o-mini", 2048, 0.1)
            .with_base_url("http://localhost:8000/v1");
        assert_eq!(client.model, "gpt-4o-mini");
        assert_eq!(client.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_ollama_client_from_config() {
        let config = LlmConfig {
            ollama_url: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        let client = OllamaClient::from_config(&config).unwrap();
        assert_eq!(client.model, "llama3.1");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.temperature, 0.0);
    }

    #[test]
    fn test_chat_messages_use_lowercase_roles() {
        let message = Message::from(&ChatMessage::new(ChatRole::Assistant, "hi"));
        assert_eq!(message.role, "assistant");

        let request = OllamaChatRequest {
            model: "llama3.1".to_string(),
            messages: vec![
                Message::from(&ChatMessage::system("translate")),
                Message::from(&ChatMessage::user("hello")),
            ],
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line("data: {\"choices\":[{\"delta\":{\"content\":\"Hal\"}}]}"),
            Some("Hal".to_string())
        );
        assert_eq!(parse_sse_line("data: {\"choices\":[{\"delta\":{}}]}"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
    }

    #[tokio::test]
    async fn test_sse_event_split_across_chunks() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, String>(b"data: {\"choices\":[{\"delta\":{\"con".to_vec()),
            Ok(b"tent\":\"Hal\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\n".to_vec()),
        ]);

        let deltas: Vec<String> = lines(chunks)
            .filter_map(|line| async move { parse_sse_line(&line.unwrap()) })
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hal", "lo"]);
    }

    #[tokio::test]
    async fn test_ndjson_object_split_across_chunks() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, String>(b"{\"response\":\"Hal".to_vec()),
            Ok(b"lo\",\"done\":false}\n{\"response\":\"!\",\"done\":true}\n".to_vec()),
        ]);

        let parts: Vec<String> = lines(chunks)
            .filter_map(|line| async move { parse_ndjson_line(&line.unwrap()) })
            .collect()
            .await;
        assert_eq!(parts, vec!["Hallo", "!"]);
    }

    #[test]
    fn test_factory_requires_openai_key() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAI,
            ..Default::default()
        };
        assert!(matches!(
            create_llm_client(&config),
            Err(CssaError::ConfigError(_))
        ));
        assert!(create_llm_client(&LlmConfig::default()).is_ok());
    }
}

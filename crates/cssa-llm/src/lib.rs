//! CSSA LLM - Language model helpers
//!
//! - [`llm`]: OpenAI and Ollama clients behind [`cssa_core::LlmClient`]
//! - [`prompt`]: chat prompt templates and prompt preprocessing
//! - [`translation`]: the translation chain built on both

pub mod llm;
pub mod prompt;
mod stream;
pub mod translation;

pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use prompt::{ChatPromptTemplate, PromptHelper};
pub use translation::TranslationChain;

//! Translation chain: prompt template, chat model, trimmed string output

use std::collections::HashMap;
use std::sync::Arc;

use cssa_core::{ChatRole, LlmClient, Result};
use futures::future::try_join_all;

use crate::prompt::ChatPromptTemplate;

const SYSTEM_TEMPLATE: &str = "You are a helpful assistant that translates {input_language} to \
     {output_language}. Translate the text accurately while preserving the original meaning and tone.";

const PREVIEW_CHARS: usize = 100;

/// First 100 characters of `text`, with an ellipsis when cut
fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Translates text from a fixed source language with an LLM
pub struct TranslationChain {
    llm: Arc<dyn LlmClient>,
    source_lang: String,
    prompt: ChatPromptTemplate,
}

impl TranslationChain {
    /// Create a chain translating from English
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self::with_source_lang(llm, "English")
    }

    pub fn with_source_lang(llm: Arc<dyn LlmClient>, source_lang: impl Into<String>) -> Self {
        let source_lang = source_lang.into();
        tracing::info!(source_lang = %source_lang, "initialized translation chain");

        Self {
            llm,
            source_lang,
            prompt: ChatPromptTemplate::from_messages([
                (ChatRole::System, SYSTEM_TEMPLATE),
                (ChatRole::User, "{input}"),
            ]),
        }
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    async fn run(&self, text: &str, target_lang: &str) -> Result<String> {
        let variables = HashMap::from([
            ("input", text),
            ("input_language", self.source_lang.as_str()),
            ("output_language", target_lang),
        ]);
        let messages = self.prompt.format_messages(&variables)?;

        let output = self.llm.chat(&messages).await?;
        Ok(output.trim().to_string())
    }

    /// Translate `text` into `target_lang`
    pub async fn translate(&self, text: &str, target_lang: &str) -> Result<String> {
        tracing::info!(
            source_lang = %self.source_lang,
            target_lang,
            "starting translation"
        );
        tracing::debug!(input = %preview(text), "translation input");

        match self.run(text, target_lang).await {
            Ok(translated) => {
                tracing::info!(target_lang, "translation finished");
                tracing::debug!(output = %preview(&translated), "translation output");
                Ok(translated)
            }
            Err(e) => {
                tracing::error!(target_lang, error = %e, "translation failed");
                Err(e)
            }
        }
    }

    /// Translate every text; results line up with `texts` and any failure
    /// fails the whole batch
    pub async fn batch_translate(&self, texts: &[String], target_lang: &str) -> Result<Vec<String>> {
        tracing::info!(
            count = texts.len(),
            source_lang = %self.source_lang,
            target_lang,
            "starting batch translation"
        );

        let result = try_join_all(texts.iter().map(|text| self.run(text, target_lang))).await;

        match result {
            Ok(translated) => {
                tracing::info!(count = translated.len(), target_lang, "batch translation finished");
                Ok(translated)
            }
            Err(e) => {
                tracing::error!(target_lang, error = %e, "batch translation failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cssa_core::{ChatMessage, CssaError};
    use futures::stream::BoxStream;
    use std::sync::Mutex;

    /// Records conversations and answers with a canned reply
    #[derive(Default)]
    struct RecordingLlm {
        conversations: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }

        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.conversations.lock().unwrap().push(messages.to_vec());
            let input = &messages[1].content;
            if input == "fail" {
                return Err(CssaError::LlmError("model crashed".to_string()));
            }
            Ok(format!("  [{}]\n", input.to_uppercase()))
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
            Err(CssaError::Unsupported("generate_stream"))
        }
    }

    #[tokio::test]
    async fn test_translate_renders_prompt_and_trims() {
        let llm = Arc::new(RecordingLlm::default());
        let chain = TranslationChain::new(llm.clone());

        let translated = chain.translate("I love programming.", "German").await.unwrap();
        assert_eq!(translated, "[I LOVE PROGRAMMING.]");

        let conversations = llm.conversations.lock().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(
            conversations[0][0],
            ChatMessage::system(
                "You are a helpful assistant that translates English to German. \
                 Translate the text accurately while preserving the original meaning and tone."
            )
        );
        assert_eq!(conversations[0][1], ChatMessage::user("I love programming."));
    }

    #[tokio::test]
    async fn test_custom_source_language() {
        let llm = Arc::new(RecordingLlm::default());
        let chain = TranslationChain::with_source_lang(llm.clone(), "French");
        assert_eq!(chain.source_lang(), "French");

        chain.translate("Bonjour", "Spanish").await.unwrap();
        let conversations = llm.conversations.lock().unwrap();
        assert!(conversations[0][0].content.contains("translates French to Spanish"));
    }

    #[tokio::test]
    async fn test_batch_translate_keeps_order() {
        let chain = TranslationChain::new(Arc::new(RecordingLlm::default()));
        let texts = vec![
            "Hello world!".to_string(),
            "How are you?".to_string(),
            "Good morning!".to_string(),
        ];

        let results = chain.batch_translate(&texts, "Spanish").await.unwrap();
        assert_eq!(
            results,
            vec!["[HELLO WORLD!]", "[HOW ARE YOU?]", "[GOOD MORNING!]"]
        );
    }

    #[tokio::test]
    async fn test_batch_translate_fails_as_a_whole() {
        let chain = TranslationChain::new(Arc::new(RecordingLlm::default()));
        let texts = vec!["ok".to_string(), "fail".to_string()];

        let err = chain.batch_translate(&texts, "Spanish").await.unwrap_err();
        assert!(matches!(err, CssaError::LlmError(_)));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}

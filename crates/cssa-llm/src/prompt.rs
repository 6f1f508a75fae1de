//! Prompt templating and preprocessing

use std::collections::{BTreeSet, HashMap};

use cssa_core::{ChatMessage, ChatRole, CssaError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

static INLINE_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]+").expect("whitespace pattern is valid"));

static LINE_EDGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" ?\n ?").expect("line edge pattern is valid"));

/// Ordered chat messages whose text may contain `{name}` placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPromptTemplate {
    messages: Vec<(ChatRole, String)>,
}

impl ChatPromptTemplate {
    pub fn from_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = (ChatRole, S)>,
        S: Into<String>,
    {
        Self {
            messages: messages
                .into_iter()
                .map(|(role, template)| (role, template.into()))
                .collect(),
        }
    }

    /// Placeholder names used across all messages, sorted
    pub fn input_variables(&self) -> BTreeSet<String> {
        self.messages
            .iter()
            .flat_map(|(_, template)| PLACEHOLDER.captures_iter(template))
            .map(|captures| captures[1].to_string())
            .collect()
    }

    /// Render every message, failing when a placeholder has no value
    pub fn format_messages(&self, variables: &HashMap<&str, &str>) -> Result<Vec<ChatMessage>> {
        let missing: Vec<String> = self
            .input_variables()
            .into_iter()
            .filter(|name| !variables.contains_key(name.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(CssaError::validation(format!(
                "missing prompt variables: {}",
                missing.join(", ")
            )));
        }

        Ok(self
            .messages
            .iter()
            .map(|(role, template)| {
                let content = PLACEHOLDER.replace_all(template, |captures: &regex::Captures| {
                    variables
                        .get(&captures[1])
                        .map(|value| value.to_string())
                        .unwrap_or_default()
                });
                ChatMessage::new(*role, content)
            })
            .collect())
    }
}

/// Normalizes raw prompts before they reach a model
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptHelper;

impl PromptHelper {
    pub fn new() -> Self {
        Self
    }

    /// Trim the prompt and collapse runs of spaces and tabs; line breaks stay
    pub fn process_prompt(&self, prompt: &str) -> Result<String> {
        tracing::debug!(length = prompt.len(), "processing prompt");

        let collapsed = INLINE_WHITESPACE.replace_all(prompt.trim(), " ");
        let processed = LINE_EDGES.replace_all(&collapsed, "\n").into_owned();

        if processed.is_empty() {
            return Err(CssaError::validation("prompt should not be empty"));
        }
        Ok(processed)
    }
}

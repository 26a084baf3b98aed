use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

pub mod classify;
pub mod error;
pub mod fallback;
pub mod gemini;
pub mod intercept;

/// Synchronous chunk sequence produced by [`ChatModel::stream`].
pub type TextChunks = Box<dyn Iterator<Item = String> + Send>;

/// Asynchronous chunk sequence produced by [`ChatModel::astream`].
pub type TextStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    Fallback,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Anything a caller may hand to a model: plain text, a message list, or an
/// arbitrary JSON mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelInput {
    Text(String),
    Messages(Vec<ChatMessage>),
    Raw(serde_json::Value),
}

impl ModelInput {
    /// Normalizes the input into a message list.
    pub fn messages(&self) -> Vec<ChatMessage> {
        match self {
            ModelInput::Text(text) => vec![ChatMessage::user(text.clone())],
            ModelInput::Messages(messages) => messages.clone(),
            ModelInput::Raw(value) => raw_messages(value),
        }
    }
}

fn raw_messages(value: &serde_json::Value) -> Vec<ChatMessage> {
    if let Some(items) = value.as_array() {
        return items.iter().flat_map(raw_messages).collect();
    }
    if let Ok(message) = serde_json::from_value::<ChatMessage>(value.clone()) {
        return vec![message];
    }
    match value.get("content").and_then(|c| c.as_str()) {
        Some(content) => vec![ChatMessage::user(content)],
        None => match value.as_str() {
            Some(s) => vec![ChatMessage::user(s)],
            None => vec![ChatMessage::user(value.to_string())],
        },
    }
}

impl From<&str> for ModelInput {
    fn from(value: &str) -> Self {
        ModelInput::Text(value.to_string())
    }
}

impl From<String> for ModelInput {
    fn from(value: String) -> Self {
        ModelInput::Text(value)
    }
}

impl From<Vec<ChatMessage>> for ModelInput {
    fn from(value: Vec<ChatMessage>) -> Self {
        ModelInput::Messages(value)
    }
}

impl From<serde_json::Value> for ModelInput {
    fn from(value: serde_json::Value) -> Self {
        ModelInput::Raw(value)
    }
}

/// The invocation surface shared by real model adapters and [`fallback::FallbackModel`].
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn id(&self) -> &str;

    fn provider(&self) -> Provider;

    fn invoke(&self, input: &ModelInput) -> anyhow::Result<String>;

    async fn ainvoke(&self, input: &ModelInput) -> anyhow::Result<String>;

    fn stream(&self, input: &ModelInput) -> anyhow::Result<TextChunks>;

    fn astream(&self, input: &ModelInput) -> TextStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_input_becomes_single_user_message() {
        let input = ModelInput::from("olá");
        assert_eq!(input.messages(), vec![ChatMessage::user("olá")]);
    }

    #[test]
    fn raw_mapping_with_role_and_content_is_decoded() {
        let input = ModelInput::from(json!({"role": "assistant", "content": "hi"}));
        assert_eq!(input.messages(), vec![ChatMessage::assistant("hi")]);
    }

    #[test]
    fn raw_mapping_without_role_is_treated_as_user_content() {
        let input = ModelInput::from(json!({"content": "test", "meta": 1}));
        assert_eq!(input.messages(), vec![ChatMessage::user("test")]);
    }

    #[test]
    fn untagged_deserialize_prefers_message_list() {
        let input: ModelInput =
            serde_json::from_value(json!([{"role": "user", "content": "a"}])).unwrap();
        assert!(matches!(input, ModelInput::Messages(ref m) if m.len() == 1));

        let input: ModelInput = serde_json::from_value(json!("plain")).unwrap();
        assert_eq!(input, ModelInput::Text("plain".to_string()));
    }
}

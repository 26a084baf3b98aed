use crate::llm::classify::{DiagnosticRecord, ModelProviderErrorHandler};
use crate::llm::{ChatModel, ModelInput, Provider, TextChunks, TextStream};
use futures::StreamExt;
use std::fmt;

const ID_PREFIX: &str = "fallback-";
const DEFAULT_MESSAGE: &str = "An unknown error occurred.";

/// Stands in for a real model after a provider failure, answering every call
/// with a rendering of the classified error.
#[derive(Clone)]
pub struct FallbackModel {
    diagnostic: DiagnosticRecord,
    component_id: String,
    id: String,
}

impl FallbackModel {
    pub fn new(diagnostic: DiagnosticRecord, component_id: impl Into<String>) -> Self {
        let component_id = component_id.into();
        let id = format!("{ID_PREFIX}{component_id}");
        Self {
            diagnostic,
            component_id,
            id,
        }
    }

    /// Classifies `error` and wraps the result.
    pub fn from_error<E>(error: &E, component_id: &str) -> Self
    where
        E: fmt::Display + ?Sized,
    {
        let diagnostic = ModelProviderErrorHandler::new().handle_api_error(error, component_id);
        Self::new(diagnostic, component_id)
    }

    pub fn diagnostic(&self) -> &DiagnosticRecord {
        &self.diagnostic
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn model_name(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        &self.id
    }

    pub fn format_error_message(&self) -> String {
        let record = &self.diagnostic;
        let message = optional(Some(&record.message)).unwrap_or(DEFAULT_MESSAGE);

        let mut sections = vec![format!("## {}", record.kind.title()), message.to_string()];
        if let Some(details) = optional(record.details.as_ref()) {
            sections.push(format!("**Details:** {details}"));
        }
        if let Some(suggestion) = optional(record.suggestion.as_ref()) {
            sections.push(format!("**Suggestion:** {suggestion}"));
        }
        sections.push(format!(
            "---\n_Agent `{}` is running in fallback mode: this is a substitute response, no model was called._",
            self.component_id
        ));

        let mut out = sections.join("\n\n");
        out.push('\n');
        out
    }

    fn chunks(&self) -> Vec<String> {
        self.format_error_message()
            .split_inclusive('\n')
            .map(str::to_string)
            .collect()
    }
}

fn optional(s: Option<&String>) -> Option<&str> {
    s.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl fmt::Display for FallbackModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FallbackModel({})", self.component_id)
    }
}

impl fmt::Debug for FallbackModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackModel")
            .field("component_id", &self.component_id)
            .field("id", &self.id)
            .field("error", &self.diagnostic.kind.as_str())
            .finish()
    }
}

#[async_trait::async_trait]
impl ChatModel for FallbackModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> Provider {
        Provider::Fallback
    }

    fn invoke(&self, _input: &ModelInput) -> anyhow::Result<String> {
        Ok(self.format_error_message())
    }

    async fn ainvoke(&self, _input: &ModelInput) -> anyhow::Result<String> {
        tokio::task::yield_now().await;
        Ok(self.format_error_message())
    }

    fn stream(&self, _input: &ModelInput) -> anyhow::Result<TextChunks> {
        Ok(Box::new(self.chunks().into_iter()))
    }

    fn astream(&self, _input: &ModelInput) -> TextStream {
        futures::stream::iter(self.chunks())
            .then(|chunk| async move {
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>(chunk)
            })
            .boxed()
    }
}

use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Failure raised by a model provider client.
#[derive(Debug, Clone)]
pub struct ModelProviderError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl ModelProviderError {
    pub fn new(provider: Provider, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            raw_output: None,
            raw_response_json: None,
        }
    }
}

impl fmt::Display for ModelProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for ModelProviderError {}

/// Missing, invalid or expired provider credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyError(String);

impl ApiKeyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for ApiKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ApiKeyError {}

/// Marks error types that come out of model provider clients.
///
/// Errors answering `true` are always absorbed by
/// [`crate::llm::intercept::ModelErrorInterceptor`]; the rest are absorbed only when
/// their text matches one of the classifier patterns.
pub trait ProviderErrorTag: fmt::Display {
    fn is_provider_error(&self) -> bool {
        false
    }
}

impl ProviderErrorTag for ModelProviderError {
    fn is_provider_error(&self) -> bool {
        true
    }
}

impl ProviderErrorTag for ApiKeyError {
    fn is_provider_error(&self) -> bool {
        true
    }
}

impl ProviderErrorTag for anyhow::Error {
    fn is_provider_error(&self) -> bool {
        self.chain()
            .any(|e| e.is::<ModelProviderError>() || e.is::<ApiKeyError>())
    }
}

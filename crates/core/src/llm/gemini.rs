use crate::config::Settings;
use crate::llm::error::ModelProviderError;
use crate::llm::{ChatModel, ModelInput, Provider, Role, TextChunks, TextStream};
use anyhow::Context;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const API_VERSION: &str = "v1beta";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Google Gemini `generateContent` adapter.
///
/// Gemini answers in one piece here; `stream`/`astream` emit the whole reply as a
/// single chunk.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    timeout: Duration,
    url_context: bool,
}

impl GeminiModel {
    pub fn from_settings(settings: &Settings, model: &str) -> anyhow::Result<Self> {
        let api_key = settings.require_google_api_key()?.to_string();
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let max_output_tokens = std::env::var("GEMINI_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);

        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = Duration::from_secs(timeout_secs);

        Ok(Self {
            http: build_http(timeout)?,
            api_key,
            base_url,
            model: model.to_string(),
            max_output_tokens,
            timeout,
            url_context: false,
        })
    }

    /// Lets the model fetch URLs mentioned in the prompt.
    pub fn with_url_context(mut self, enabled: bool) -> Self {
        self.url_context = enabled;
        self
    }

    fn build_request(&self, input: &ModelInput) -> anyhow::Result<GenerateContentRequest> {
        let mut system = Vec::new();
        let mut contents = Vec::new();
        for message in input.messages() {
            match message.role {
                Role::System => system.push(Part::text(message.content)),
                Role::User => contents.push(Content::new("user", message.content)),
                Role::Assistant => contents.push(Content::new("model", message.content)),
            }
        }
        anyhow::ensure!(
            !contents.is_empty(),
            "model input has no user or assistant messages"
        );

        let tools = if self.url_context {
            vec![Tool {
                url_context: UrlContext {},
            }]
        } else {
            Vec::new()
        };

        Ok(GenerateContentRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: system,
            }),
            contents,
            tools,
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        })
    }

    async fn generate(&self, input: &ModelInput) -> anyhow::Result<String> {
        let req = self.build_request(input)?;

        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);

        let url = format!(
            "{}/{API_VERSION}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        tracing::debug!(
            model = %self.model,
            url_context = self.url_context,
            "Gemini generateContent"
        );

        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|e| ModelProviderError::new(Provider::Gemini, "request", e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| ModelProviderError::new(Provider::Gemini, "read", e.to_string()))?;
        if !status.is_success() {
            return Err(http_error(status, text).into());
        }

        let (parsed, raw_json) = parse_response(&text)?;

        if let Some(reason) = parsed.finish_reason() {
            if reason == "MAX_TOKENS" {
                tracing::warn!(
                    model = %self.model,
                    max_output_tokens = self.max_output_tokens,
                    "Gemini finish_reason=MAX_TOKENS; reply is truncated"
                );
            }
        }

        response_text(&parsed).map_err(|detail| {
            anyhow::Error::new(ModelProviderError {
                provider: Provider::Gemini,
                stage: "decode",
                detail,
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            })
        })
    }
}

fn build_http(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build reqwest client")
}

fn http_error(status: StatusCode, text: String) -> ModelProviderError {
    let raw_response_json = serde_json::from_str::<Value>(&text).ok();
    let envelope = raw_response_json
        .clone()
        .and_then(|v| serde_json::from_value::<ErrorEnvelope>(v).ok());

    let detail = match envelope {
        Some(ErrorEnvelope { error }) => {
            let reasons: Vec<&str> = error
                .details
                .iter()
                .filter_map(|d| d.reason.as_deref())
                .collect();
            let mut detail = format!("status={status}");
            if let Some(api_status) = &error.status {
                detail.push_str(&format!(" {api_status}"));
            }
            detail.push_str(&format!(": {}", error.message));
            if !reasons.is_empty() {
                detail.push_str(&format!(" (reason={})", reasons.join(",")));
            }
            detail
        }
        None => format!("status={status}"),
    };

    ModelProviderError {
        provider: Provider::Gemini,
        stage: "http",
        detail,
        raw_output: Some(text),
        raw_response_json,
    }
}

fn parse_response(text: &str) -> Result<(GenerateContentResponse, Value), ModelProviderError> {
    let decode_error = |detail: String, raw_response_json: Option<Value>| ModelProviderError {
        provider: Provider::Gemini,
        stage: "decode",
        detail,
        raw_output: Some(text.to_string()),
        raw_response_json,
    };

    let raw_json = serde_json::from_str::<Value>(text)
        .map_err(|e| decode_error(format!("response body is not JSON: {e}"), None))?;
    let parsed = serde_json::from_value::<GenerateContentResponse>(raw_json.clone())
        .map_err(|e| {
            decode_error(
                format!("unexpected generateContent response: {e}"),
                Some(raw_json.clone()),
            )
        })?;
    Ok((parsed, raw_json))
}

fn response_text(res: &GenerateContentResponse) -> Result<String, String> {
    let Some(candidate) = res.candidates.first() else {
        return Err(match res
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            Some(reason) => format!("prompt blocked: {reason}"),
            None => "response contained no candidates".to_string(),
        });
    };

    let mut out = String::new();
    for part in candidate.content.iter().flat_map(|c| &c.parts) {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(text) = &part.text {
            out.push_str(text);
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl ChatModel for GeminiModel {
    fn id(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    /// Blocks on a private runtime. Fails when called from async code.
    fn invoke(&self, input: &ModelInput) -> anyhow::Result<String> {
        anyhow::ensure!(
            tokio::runtime::Handle::try_current().is_err(),
            "GeminiModel::invoke called inside an async runtime; use ainvoke"
        );
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build runtime for blocking Gemini call")?;

        // Pooled connections must not outlive the runtime that opened them.
        let mut this = self.clone();
        this.http = build_http(self.timeout)?;
        rt.block_on(this.generate(input))
    }

    async fn ainvoke(&self, input: &ModelInput) -> anyhow::Result<String> {
        self.generate(input).await
    }

    fn stream(&self, input: &ModelInput) -> anyhow::Result<TextChunks> {
        let text = self.invoke(input)?;
        Ok(Box::new(std::iter::once(text)))
    }

    fn astream(&self, input: &ModelInput) -> TextStream {
        let this = self.clone();
        let input = input.clone();
        futures::stream::once(async move { this.generate(&input).await }).boxed()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: String) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            thought: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    url_context: UrlContext,
}

#[derive(Debug, Clone, Serialize)]
struct UrlContext {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationError,
    RateLimit,
    ModelNotFound,
    ModelProviderError,
    #[default]
    UnknownError,
}

impl ErrorKind {
    /// Unrecognized names map to [`ErrorKind::UnknownError`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "authentication_error" => ErrorKind::AuthenticationError,
            "rate_limit" => ErrorKind::RateLimit,
            "model_not_found" => ErrorKind::ModelNotFound,
            "model_provider_error" => ErrorKind::ModelProviderError,
            _ => ErrorKind::UnknownError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::ModelProviderError => "model_provider_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationError => "Authentication Error",
            ErrorKind::RateLimit => "Rate Limit",
            ErrorKind::ModelNotFound => "Model Not Found",
            ErrorKind::ModelProviderError | ErrorKind::UnknownError => "Unknown Error",
        }
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.as_deref().map(Self::from_name).unwrap_or_default())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured classification of a provider failure.
///
/// Serializes as `{"error", "message", "agent", "suggestion"?, "details"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    #[serde(rename = "error", default)]
    pub kind: ErrorKind,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "agent", default)]
    pub component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl DiagnosticRecord {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        component_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            component_id: component_id.into(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = non_empty(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = non_empty(details.into());
        self
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

enum Matcher {
    AnyOf(&'static [&'static str]),
    /// `subject` appears, followed later in the text by one of `then`.
    Followed {
        subject: &'static str,
        then: &'static [&'static str],
    },
}

impl Matcher {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Matcher::AnyOf(phrases) => phrases.iter().any(|p| lowered.contains(p)),
            Matcher::Followed { subject, then } => match lowered.find(subject) {
                Some(at) => {
                    let rest = &lowered[at + subject.len()..];
                    then.iter().any(|p| rest.contains(p))
                }
                None => false,
            },
        }
    }
}

enum Details {
    Fixed(&'static str),
    OriginalText,
}

struct Rule {
    kind: ErrorKind,
    matchers: &'static [Matcher],
    message: &'static str,
    details: Details,
    suggestion: Option<&'static str>,
}

impl Rule {
    fn matches(&self, lowered: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(lowered))
    }

    fn record(&self, text: &str, component_id: &str) -> DiagnosticRecord {
        let record = DiagnosticRecord::new(self.kind, self.message, component_id);
        let record = match self.details {
            Details::Fixed(details) => record.with_details(details),
            Details::OriginalText => record.with_details(text),
        };
        match self.suggestion {
            Some(suggestion) => record.with_suggestion(suggestion),
            None => record,
        }
    }
}

// Evaluated top to bottom; first match wins.
const RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::AuthenticationError,
        matchers: &[Matcher::AnyOf(&[
            "api key",
            "api_key_invalid",
            "invalid api key",
            "authentication failed",
            "unauthorized",
            "expired",
        ])],
        message: "⚠️ API key issue detected. Please check your API credentials in the .env file.",
        details: Details::Fixed(
            "The API key for this model provider is either expired, invalid, or missing.",
        ),
        suggestion: Some("Update your API key in the .env file and restart the server."),
    },
    Rule {
        kind: ErrorKind::RateLimit,
        matchers: &[Matcher::AnyOf(&[
            "rate limit",
            "too many requests",
            "resource_exhausted",
        ])],
        message: "⏱️ Rate limit reached. Please try again in a moment.",
        details: Details::OriginalText,
        suggestion: Some("Wait a few seconds before retrying."),
    },
    Rule {
        kind: ErrorKind::ModelNotFound,
        matchers: &[
            Matcher::AnyOf(&["model not found"]),
            Matcher::Followed {
                subject: "model",
                then: &["not found", "not available"],
            },
        ],
        message: "❌ The requested model is not available.",
        details: Details::OriginalText,
        suggestion: Some(
            "Check the model name in the agent configuration and choose an available model.",
        ),
    },
];

const CATCH_ALL: Rule = Rule {
    kind: ErrorKind::ModelProviderError,
    matchers: &[],
    message: "❌ An error occurred with the AI model provider.",
    details: Details::OriginalText,
    suggestion: None,
};

/// Maps provider failures onto [`DiagnosticRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelProviderErrorHandler;

impl ModelProviderErrorHandler {
    pub fn new() -> Self {
        Self
    }

    /// Classifies `error` by its full text (for `anyhow::Error`, the whole context chain).
    pub fn handle_api_error<E>(&self, error: &E, component_id: &str) -> DiagnosticRecord
    where
        E: fmt::Display + ?Sized,
    {
        self.classify_text(&format!("{error:#}"), component_id)
    }

    pub fn classify_text(&self, text: &str, component_id: &str) -> DiagnosticRecord {
        let lowered = text.to_lowercase();
        RULES
            .iter()
            .find(|rule| rule.matches(&lowered))
            .unwrap_or(&CATCH_ALL)
            .record(text, component_id)
    }

    /// Whether `text` hits any classification pattern other than the catch-all.
    pub fn matches_known_pattern(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        RULES.iter().any(|rule| rule.matches(&lowered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(text: &str) -> DiagnosticRecord {
        let err = anyhow::anyhow!(text.to_string());
        ModelProviderErrorHandler::new().handle_api_error(&err, "test_agent")
    }

    #[test]
    fn expired_api_key_is_an_authentication_error() {
        let record = classify("API key expired. Please renew the API key.");
        assert_eq!(record.kind, ErrorKind::AuthenticationError);
        assert!(record.message.contains("API key issue detected"));
        assert_eq!(record.component_id, "test_agent");
        assert!(record.suggestion.unwrap().contains("Update your API key"));
    }

    #[test]
    fn authentication_wording_variants_all_match() {
        for text in [
            "API_KEY_INVALID",
            "Invalid API key provided",
            "Authentication failed",
            "Unauthorized access",
        ] {
            let record = classify(text);
            assert_eq!(record.kind, ErrorKind::AuthenticationError, "{text}");
            assert!(record.message.contains("API key issue"), "{text}");
        }
    }

    #[test]
    fn rate_limit_is_detected() {
        let record = classify("Rate limit exceeded. Too many requests.");
        assert_eq!(record.kind, ErrorKind::RateLimit);
        assert!(record.message.contains("Rate limit reached"));
        assert!(record.suggestion.unwrap().contains("Wait a few seconds"));
    }

    #[test]
    fn missing_model_is_detected() {
        let record = classify("Model not found: gpt-5");
        assert_eq!(record.kind, ErrorKind::ModelNotFound);
        assert!(record.message.contains("model is not available"));

        let record = classify("models/gemini-9 is not found for API version v1beta");
        assert_eq!(record.kind, ErrorKind::ModelNotFound);
    }

    #[test]
    fn model_must_precede_the_missing_phrase() {
        let record = classify("gemini-9 model is not available in this region");
        assert_eq!(record.kind, ErrorKind::ModelNotFound);

        let handler = ModelProviderErrorHandler::new();
        assert!(!handler.matches_known_pattern("config file not found while loading model"));
        assert!(!handler.matches_known_pattern("table does not exist: model_runs"));
    }

    #[test]
    fn provider_errors_without_a_known_pattern_use_the_default_title() {
        assert_eq!(ErrorKind::ModelProviderError.title(), "Unknown Error");
        assert_eq!(ErrorKind::ModelNotFound.title(), "Model Not Found");
    }

    #[test]
    fn authentication_outranks_rate_limit() {
        let record = classify("Unauthorized: rate limit bucket unavailable");
        assert_eq!(record.kind, ErrorKind::AuthenticationError);
    }

    #[test]
    fn unmatched_text_falls_through_to_provider_error() {
        let record = classify("Some unexpected error occurred");
        assert_eq!(record.kind, ErrorKind::ModelProviderError);
        assert!(record
            .message
            .contains("error occurred with the AI model provider"));
        assert!(record.details.unwrap().contains("Some unexpected error"));
        assert!(record.suggestion.is_none());
    }

    #[test]
    fn empty_error_text_still_classifies() {
        let record = ModelProviderErrorHandler::new().classify_text("", "test_agent");
        assert_eq!(record.kind, ErrorKind::ModelProviderError);
        assert!(!record.message.is_empty());
        assert_eq!(record.details, None);
    }

    #[test]
    fn known_pattern_excludes_catch_all() {
        let handler = ModelProviderErrorHandler::new();
        assert!(handler.matches_known_pattern("429 Too Many Requests"));
        assert!(!handler.matches_known_pattern("This is not a model error"));
    }

    #[test]
    fn record_serializes_as_flat_mapping() {
        let record = classify("Rate limit exceeded");
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["error"], "rate_limit");
        assert_eq!(v["agent"], "test_agent");
        assert!(v.get("component_id").is_none());
    }

    #[test]
    fn minimal_mapping_deserializes_with_defaults() {
        let record: DiagnosticRecord =
            serde_json::from_value(json!({"error": "unknown_error"})).unwrap();
        assert_eq!(record.kind, ErrorKind::UnknownError);
        assert!(record.message.is_empty());
        assert_eq!(record.suggestion, None);

        let record: DiagnosticRecord =
            serde_json::from_value(json!({"error": "quota_melted"})).unwrap();
        assert_eq!(record.kind, ErrorKind::UnknownError);

        let record: DiagnosticRecord =
            serde_json::from_value(json!({"error": null, "message": "x"})).unwrap();
        assert_eq!(record.kind, ErrorKind::UnknownError);
    }
}

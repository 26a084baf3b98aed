pub mod agents;
pub mod llm;

pub mod config {
    use crate::llm::error::ApiKeyError;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub google_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub materials_base_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                materials_base_url: std::env::var("ATENA_MATERIALS_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            })
        }

        /// Missing keys surface as [`ApiKeyError`] so agents can degrade instead of failing.
        pub fn require_google_api_key(&self) -> anyhow::Result<&str> {
            self.google_api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    ApiKeyError::new("GOOGLE_API_KEY is required: no API key configured").into()
                })
        }
    }
}

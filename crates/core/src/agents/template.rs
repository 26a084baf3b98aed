use crate::agents::{model_or_fallback, Agent};
use crate::config::Settings;
use crate::llm::gemini::GeminiModel;

pub const AGENT_ID: &str = "template-agent";
pub const MODEL_ID: &str = "gemini-2.5-flash";

/// Starting point for new personas: copy, rename, and rewrite the instructions.
pub fn get_template_agent(settings: &Settings) -> Agent {
    let model = model_or_fallback(AGENT_ID, || GeminiModel::from_settings(settings, MODEL_ID));

    Agent::new(
        AGENT_ID,
        "Template Agent",
        "General-purpose assistant used as a template for new agents.",
        [
            "You are a helpful assistant.",
            "Answer concisely and say so when you do not know something.",
        ]
        .join("\n"),
        model,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatModel;

    #[test]
    fn template_agent_uses_flash_model() {
        let settings = Settings {
            google_api_key: Some("test-key".to_string()),
            ..Settings::default()
        };
        let agent = get_template_agent(&settings);
        assert_eq!(agent.agent_id, "template-agent");
        assert_eq!(agent.model.id(), MODEL_ID);
    }
}

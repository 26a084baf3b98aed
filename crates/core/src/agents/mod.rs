use crate::config::Settings;
use crate::llm::fallback::FallbackModel;
use crate::llm::intercept::{handle_model_errors, ModelCall, ModelErrorInterceptor};
use crate::llm::{ChatMessage, ChatModel, ModelInput, TextStream};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;

pub mod atena;
pub mod template;

/// A persona: fixed instructions bound to one model.
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub model: Arc<dyn ChatModel>,
    guard: ModelErrorInterceptor,
}

impl Agent {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            guard: handle_model_errors(agent_id.clone()),
            agent_id,
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            model,
        }
    }

    fn input(&self, message: &str) -> ModelInput {
        ModelInput::Messages(vec![
            ChatMessage::system(self.instructions.clone()),
            ChatMessage::user(message),
        ])
    }

    pub async fn run(&self, message: &str) -> anyhow::Result<ModelCall<String>> {
        let input = self.input(message);
        self.guard.run_async(self.model.ainvoke(&input)).await
    }

    #[cfg(test)]
    fn run_blocking(&self, message: &str) -> anyhow::Result<ModelCall<String>> {
        let input = self.input(message);
        self.guard.run(|| self.model.invoke(&input))
    }

    /// Streams the reply. A provider failure mid-stream is replaced by the
    /// fallback rendering of the classified error.
    pub fn run_stream(&self, message: &str) -> TextStream {
        let guard = self.guard.clone();
        self.model
            .astream(&self.input(message))
            .flat_map(move |item| match item {
                Ok(chunk) => futures::stream::once(futures::future::ready(Ok(chunk))).boxed(),
                Err(err) => match guard.absorb(err) {
                    Ok(record) => FallbackModel::new(record, guard.component_id())
                        .astream(&ModelInput::Text(String::new())),
                    Err(err) => futures::stream::once(futures::future::ready(Err(err))).boxed(),
                },
            })
            .boxed()
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("model", &self.model.id())
            .finish()
    }
}

/// Builds the real model, or a [`FallbackModel`] describing why it could not be built.
pub fn model_or_fallback<M, F>(agent_id: &str, build: F) -> Arc<dyn ChatModel>
where
    M: ChatModel + 'static,
    F: FnOnce() -> anyhow::Result<M>,
{
    match build() {
        Ok(model) => Arc::new(model),
        Err(err) => {
            tracing::warn!(
                agent_id,
                error = %format!("{err:#}"),
                "model unavailable; agent starts in fallback mode"
            );
            Arc::new(FallbackModel::from_error(&err, agent_id))
        }
    }
}

pub const AGENT_IDS: &[&str] = &[atena::AGENT_ID, template::AGENT_ID];

pub fn get_agent(agent_id: &str, settings: &Settings) -> Option<Agent> {
    match agent_id {
        atena::AGENT_ID => Some(atena::get_atena_agent(settings)),
        template::AGENT_ID => Some(template::get_template_agent(settings)),
        _ => None,
    }
}

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use atena_core::agents::{self, Agent};
use atena_core::config::Settings;
use atena_core::llm::intercept::ModelCall;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    if settings.require_google_api_key().is_err() {
        tracing::warn!("GOOGLE_API_KEY missing; agents will answer in fallback mode");
    }

    let app = router(AppState::new(settings));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/agents", get(list_agents))
        .route("/agents/:agent_id/runs", post(create_run))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

type AgentLookup = fn(&str, &Settings) -> Option<Agent>;

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    agent_ids: &'static [&'static str],
    lookup: AgentLookup,
}

impl AppState {
    fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            agent_ids: agents::AGENT_IDS,
            lookup: agents::get_agent,
        }
    }

    fn agent(&self, agent_id: &str) -> Result<Agent, StatusCode> {
        (self.lookup)(agent_id, &self.settings).ok_or(StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Serialize)]
struct ApiAgent {
    agent_id: String,
    name: String,
    description: String,
    model_id: String,
    provider: String,
}

impl From<&Agent> for ApiAgent {
    fn from(agent: &Agent) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            name: agent.name.clone(),
            description: agent.description.clone(),
            model_id: agent.model.id().to_string(),
            provider: agent.model.provider().to_string(),
        }
    }
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<ApiAgent>> {
    let agents = state
        .agent_ids
        .iter()
        .filter_map(|id| state.agent(id).ok())
        .map(|agent| ApiAgent::from(&agent))
        .collect();
    Json(agents)
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    message: String,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiRun {
    run_id: Uuid,
    agent_id: String,
    content: String,
    created_at: DateTime<Utc>,
}

async fn create_run(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Response, StatusCode> {
    let agent = state.agent(&agent_id)?;

    if req.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if req.stream {
        let body = agent.run_stream(&req.message).map(|chunk| {
            chunk.map_err(|e| {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "agent stream failed");
                e
            })
        });
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(body),
        )
            .into_response());
    }

    let outcome = agent.run(&req.message).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(%agent_id, error = %e, "agent run failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let outcome = outcome.map(|content| ApiRun {
        run_id: Uuid::new_v4(),
        agent_id: agent.agent_id.clone(),
        content,
        created_at: Utc::now(),
    });
    if let ModelCall::Degraded(failure) = &outcome {
        tracing::warn!(%agent_id, kind = %failure.diagnostic.kind, "agent run degraded");
    }

    Ok(Json(outcome).into_response())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atena_core::llm::error::ModelProviderError;
    use atena_core::llm::{ChatModel, ModelInput, Provider, TextChunks, TextStream};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(Settings::default()))
    }

    /// A model whose provider always answers with a quota error.
    struct ExhaustedModel;

    #[async_trait::async_trait]
    impl ChatModel for ExhaustedModel {
        fn id(&self) -> &str {
            "gemini-2.5-pro"
        }

        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        fn invoke(&self, _input: &ModelInput) -> anyhow::Result<String> {
            Err(ModelProviderError::new(
                Provider::Gemini,
                "http",
                "status=429 Too Many Requests RESOURCE_EXHAUSTED: Quota exceeded",
            )
            .into())
        }

        async fn ainvoke(&self, input: &ModelInput) -> anyhow::Result<String> {
            self.invoke(input)
        }

        fn stream(&self, input: &ModelInput) -> anyhow::Result<TextChunks> {
            Ok(Box::new(std::iter::once(self.invoke(input)?)))
        }

        fn astream(&self, input: &ModelInput) -> TextStream {
            futures::stream::once(futures::future::ready(self.invoke(input))).boxed()
        }
    }

    fn exhausted_agent(agent_id: &str, _settings: &Settings) -> Option<Agent> {
        (agent_id == "atena").then(|| {
            Agent::new("atena", "Atena", "", "be brief", Arc::new(ExhaustedModel))
        })
    }

    fn exhausted_app() -> Router {
        router(AppState {
            lookup: exhausted_agent,
            ..AppState::new(Settings::default())
        })
    }

    async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn run_request(agent_id: &str, body: &str) -> Request<Body> {
        Request::post(format!("/agents/{agent_id}/runs"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let res = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn lists_agents_with_their_models() {
        let res = app()
            .oneshot(Request::get("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let v = body_json(res).await;
        let atena = v
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["agent_id"] == "atena")
            .unwrap();
        // No key configured in tests.
        assert_eq!(atena["model_id"], "fallback-atena");
        assert_eq!(atena["provider"], "fallback");
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let res = app()
            .oneshot(run_request("nobody", r#"{"message": "oi"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let res = app()
            .oneshot(run_request("atena", r#"{"message": "  "}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn keyless_run_returns_fallback_content() {
        let res = app()
            .oneshot(run_request("atena", r#"{"message": "O que é o módulo II?"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let v = body_json(res).await;
        assert_eq!(v["agent_id"], "atena");
        let content = v["content"].as_str().unwrap();
        assert!(content.contains("Authentication Error"));
        assert!(content.contains("fallback mode"));
    }

    #[tokio::test]
    async fn provider_failure_returns_degraded_json() {
        let res = exhausted_app()
            .oneshot(run_request("atena", r#"{"message": "oi"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let v = body_json(res).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "rate_limit");
        assert_eq!(v["agent"], "atena");
        assert!(v["suggestion"].as_str().unwrap().contains("Wait a few seconds"));
        assert!(v.get("content").is_none());
    }

    #[tokio::test]
    async fn provider_failure_mid_stream_is_replaced_by_fallback_text() {
        let res = exhausted_app()
            .oneshot(run_request("atena", r#"{"message": "oi", "stream": true}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("Rate Limit"));
        assert!(text.contains("fallback mode"));
    }

    #[tokio::test]
    async fn streamed_run_returns_plain_text() {
        let res = app()
            .oneshot(run_request(
                "template-agent",
                r#"{"message": "hi", "stream": true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("template-agent"));
        assert!(text.contains("Authentication Error"));
    }

    #[test]
    fn degraded_outcome_serializes_flat() {
        let failure = atena_core::llm::intercept::FailureResponse::from(
            atena_core::llm::classify::ModelProviderErrorHandler::new()
                .classify_text("Rate limit exceeded", "atena"),
        );
        let outcome: ModelCall<ApiRun> = ModelCall::Degraded(failure);
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "rate_limit");
        assert_eq!(v["agent"], "atena");
    }
}

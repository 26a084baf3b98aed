use crate::llm::classify::{DiagnosticRecord, ModelProviderErrorHandler};
use crate::llm::error::ProviderErrorTag;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Caller-safe result of a call whose provider failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    #[serde(flatten)]
    pub diagnostic: DiagnosticRecord,
}

impl From<DiagnosticRecord> for FailureResponse {
    fn from(diagnostic: DiagnosticRecord) -> Self {
        Self {
            success: false,
            diagnostic,
        }
    }
}

/// Outcome of an intercepted call. Serializes as the bare value on success and
/// as `{"success": false, ...}` when the provider failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelCall<T> {
    Completed(T),
    Degraded(FailureResponse),
}

impl<T> ModelCall<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ModelCall::Degraded(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            ModelCall::Completed(value) => Some(value),
            ModelCall::Degraded(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ModelCall<U> {
        match self {
            ModelCall::Completed(value) => ModelCall::Completed(f(value)),
            ModelCall::Degraded(failure) => ModelCall::Degraded(failure),
        }
    }
}

/// Absorbs provider failures raised by the calls it wraps. One attempt per
/// call; errors it does not recognize are handed back unchanged.
#[derive(Debug, Clone)]
pub struct ModelErrorInterceptor {
    component_id: Arc<str>,
    handler: ModelProviderErrorHandler,
}

pub fn handle_model_errors(component_id: impl Into<String>) -> ModelErrorInterceptor {
    ModelErrorInterceptor {
        component_id: Arc::from(component_id.into()),
        handler: ModelProviderErrorHandler::new(),
    }
}

impl ModelErrorInterceptor {
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Untagged errors are matched on their own message only; context
    /// attached by callers does not count.
    pub fn recognizes<E>(&self, err: &E) -> bool
    where
        E: ProviderErrorTag + ?Sized,
    {
        err.is_provider_error() || self.handler.matches_known_pattern(&err.to_string())
    }

    /// Classifies `err` if it is a provider failure, otherwise returns it as-is.
    pub fn absorb<E: ProviderErrorTag>(&self, err: E) -> Result<DiagnosticRecord, E> {
        if !self.recognizes(&err) {
            return Err(err);
        }
        let record = self.handler.handle_api_error(&err, &self.component_id);
        tracing::warn!(
            component_id = %self.component_id,
            kind = %record.kind,
            error = %err,
            "model provider error absorbed"
        );
        Ok(record)
    }

    fn settle<T, E: ProviderErrorTag>(&self, result: Result<T, E>) -> Result<ModelCall<T>, E> {
        match result {
            Ok(value) => Ok(ModelCall::Completed(value)),
            Err(err) => self
                .absorb(err)
                .map(|record| ModelCall::Degraded(record.into())),
        }
    }

    pub fn run<T, E, F>(&self, f: F) -> Result<ModelCall<T>, E>
    where
        E: ProviderErrorTag,
        F: FnOnce() -> Result<T, E>,
    {
        self.settle(f())
    }

    pub async fn run_async<T, E, Fut>(&self, fut: Fut) -> Result<ModelCall<T>, E>
    where
        E: ProviderErrorTag,
        Fut: Future<Output = Result<T, E>>,
    {
        self.settle(fut.await)
    }

    pub fn wrap<A, T, E, F>(&self, f: F) -> impl Fn(A) -> Result<ModelCall<T>, E>
    where
        E: ProviderErrorTag,
        F: Fn(A) -> Result<T, E>,
    {
        let this = self.clone();
        move |arg| this.settle(f(arg))
    }

    pub fn wrap_async<A, T, E, F, Fut>(
        &self,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<ModelCall<T>, E>>
    where
        T: Send + 'static,
        E: ProviderErrorTag + Send + 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let this = self.clone();
        move |arg| {
            let this = this.clone();
            let fut = f(arg);
            async move { this.settle(fut.await) }.boxed()
        }
    }
}

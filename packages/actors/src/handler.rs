//! Job handler trait, registry and dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use integration_core::{Application, HandlerKey, Job, JobOutcome};

/// What a handler reports for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub message: String,
}

impl HandlerOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Result type for job handlers. `Err` is a fault, not an explicit failure.
pub type HandlerResult = Result<HandlerOutcome, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// A handler is registered under the `(model, function)` pair that
/// applications name as their target.
pub trait JobHandler: Send + Sync + 'static {
    /// The target this handler answers to.
    fn key(&self) -> HandlerKey;

    /// Process a job of the given application.
    fn handle(&self, job: &Job, application: &Application) -> HandlerFuture;
}

/// Why a job could not be handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Application has no handler target")]
    MissingTarget,
    #[error("No handler registered for {0}")]
    UnknownHandler(HandlerKey),
}

/// Registry for job handlers.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same target.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.key(), Arc::new(handler));
    }

    /// Get the handler for a target.
    pub fn get(&self, key: &HandlerKey) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Resolve the handler an application points at.
    pub fn resolve(&self, application: &Application) -> Result<Arc<dyn JobHandler>, DispatchError> {
        let key = application.handler_key();
        if !key.is_complete() {
            return Err(DispatchError::MissingTarget);
        }
        self.get(&key).ok_or(DispatchError::UnknownHandler(key))
    }

    /// List all registered targets.
    pub fn keys(&self) -> Vec<&HandlerKey> {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job, &Application) -> HandlerFuture + Send + Sync + 'static,
{
    key: HandlerKey,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job, &Application) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(model: impl Into<String>, function: impl Into<String>, handler: F) -> Self {
        Self {
            key: HandlerKey::new(model, function),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job, &Application) -> HandlerFuture + Send + Sync + 'static,
{
    fn key(&self) -> HandlerKey {
        self.key.clone()
    }

    fn handle(&self, job: &Job, application: &Application) -> HandlerFuture {
        (self.handler)(job, application)
    }
}

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler returned normally, successfully or not.
    Completed(HandlerOutcome),
    /// No handler could be resolved for the application.
    Unresolved(DispatchError),
    /// The handler returned an error or panicked.
    Faulted(String),
}

impl Dispatch {
    /// The outcome written back to the job.
    pub fn outcome(&self) -> JobOutcome {
        match self {
            Dispatch::Completed(outcome) => {
                JobOutcome::from_handler(outcome.success, outcome.message.clone())
            }
            Dispatch::Unresolved(_) => JobOutcome::unresolved(),
            Dispatch::Faulted(_) => JobOutcome::fault(),
        }
    }
}

/// Resolve and run the handler for one job. Panics are caught and reported
/// as faults.
pub async fn dispatch(registry: &JobHandlerRegistry, job: &Job, application: &Application) -> Dispatch {
    let handler = match registry.resolve(application) {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(job = %job.id, application = %application.name, "{}", e);
            return Dispatch::Unresolved(e);
        }
    };

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| {
        handler.handle(job, application)
    })) {
        Ok(future) => future,
        Err(panic) => return fault(job, application, panic_message(panic.as_ref())),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(outcome)) => {
            if !outcome.success {
                tracing::info!(
                    job = %job.id,
                    application = %application.name,
                    "Handler reported failure: {}",
                    outcome.message
                );
            }
            Dispatch::Completed(outcome)
        }
        Ok(Err(e)) => fault(job, application, e),
        Err(panic) => fault(job, application, panic_message(panic.as_ref())),
    }
}

fn fault(job: &Job, application: &Application, detail: String) -> Dispatch {
    tracing::error!(
        job = %job.id,
        application = %application.name,
        target = %application.handler_key(),
        "Handler faulted: {}",
        detail
    );
    Dispatch::Faulted(detail)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integration_core::{ApplicationId, HANDLER_FAULT_MESSAGE, JobState, UNRESOLVED_HANDLER_MESSAGE};

    fn app(function: &str) -> Application {
        Application::new("test", "admin", "demo", function)
    }

    fn explode() -> HandlerResult {
        panic!("boom")
    }

    fn registry() -> JobHandlerRegistry {
        let mut registry = JobHandlerRegistry::new();
        registry.register(FnHandler::new("demo", "ok", |job, _| {
            let data = job.data.clone().unwrap_or_default();
            Box::pin(async move { HandlerResult::Ok(HandlerOutcome::ok(format!("processed {data}"))) })
        }));
        registry.register(FnHandler::new("demo", "fail", |_, _| {
            Box::pin(async { HandlerResult::Ok(HandlerOutcome::failed("remote rejected")) })
        }));
        registry.register(FnHandler::new("demo", "fault", |_, _| {
            Box::pin(async { HandlerResult::Err("connection reset".to_string()) })
        }));
        registry.register(FnHandler::new("demo", "panic", |_, _| {
            Box::pin(async { explode() })
        }));
        registry
    }

    #[tokio::test]
    async fn test_outcome_mapping() {
        let registry = registry();
        let job = Job::ready(ApplicationId::new()).with_data("x");

        let ok = dispatch(&registry, &job, &app("ok")).await.outcome();
        assert_eq!(ok, JobOutcome::Done("processed x".into()));

        let failed = dispatch(&registry, &job, &app("fail")).await.outcome();
        assert_eq!(failed, JobOutcome::Error("remote rejected".into()));

        let faulted = dispatch(&registry, &job, &app("fault")).await;
        assert_eq!(faulted, Dispatch::Faulted("connection reset".into()));
        assert_eq!(faulted.outcome().message(), HANDLER_FAULT_MESSAGE);

        let panicked = dispatch(&registry, &job, &app("panic")).await;
        assert!(matches!(panicked, Dispatch::Faulted(ref m) if m.contains("boom")));
        assert_eq!(panicked.outcome().state(), JobState::Error);
    }

    #[tokio::test]
    async fn test_unresolved_targets() {
        let registry = registry();
        let job = Job::ready(ApplicationId::new());

        let unknown = dispatch(&registry, &job, &app("missing")).await;
        assert_eq!(
            unknown,
            Dispatch::Unresolved(DispatchError::UnknownHandler(HandlerKey::new("demo", "missing")))
        );
        assert_eq!(unknown.outcome().message(), UNRESOLVED_HANDLER_MESSAGE);

        let empty = dispatch(&registry, &job, &app(" ")).await;
        assert_eq!(empty, Dispatch::Unresolved(DispatchError::MissingTarget));
    }

    #[test]
    fn test_registry_keys() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.get(&HandlerKey::new("demo", "ok")).is_some());
        assert_eq!(registry.keys()[0], &HandlerKey::new("demo", "fail"));
    }
}

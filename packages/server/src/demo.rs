//! Demo handlers for trying the engine end to end.

use std::time::Duration;

use actors::{FnHandler, HandlerOutcome, HandlerResult, JobHandlerRegistry};
use db::repositories::ApplicationRepository;
use integration_core::Application;

/// Model the demo handlers are registered under.
pub const DEMO_MODEL: &str = "application.integration.data";

const DEMO_APPLICATION: &str = "Demo integration";

/// Register a handler that waits `delay` and then reports `success`.
fn register_demo(
    handlers: &mut JobHandlerRegistry,
    function: &'static str,
    delay: Duration,
    success: bool,
) {
    handlers.register(FnHandler::new(DEMO_MODEL, function, move |job, application| {
        let job_id = job.id;
        let application = application.name.clone();
        Box::pin(async move {
            tracing::info!(job = %job_id, %application, "{} started", function);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = if success {
                HandlerOutcome::ok(format!("Job {job_id} processed by {function}"))
            } else {
                HandlerOutcome::failed(format!("Job {job_id} rejected by {function}"))
            };
            HandlerResult::Ok(outcome)
        })
    }));
}

/// Handlers available to every deployment.
pub fn demo_handlers() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();

    register_demo(&mut handlers, "test_rapid_process", Duration::ZERO, true);
    register_demo(&mut handlers, "test_slow_process", Duration::from_secs(5), true);
    register_demo(&mut handlers, "test_really_slow_process", Duration::from_secs(15), true);
    register_demo(&mut handlers, "test_rapid_error_process", Duration::ZERO, false);
    register_demo(&mut handlers, "test_slow_error_process", Duration::from_secs(10), false);

    handlers
}

/// Create an inactive demo application when the database has none.
pub async fn seed_demo_application() -> Result<(), db::DbError> {
    if !ApplicationRepository::list().await?.is_empty() {
        return Ok(());
    }

    let application = Application::new(DEMO_APPLICATION, "admin", DEMO_MODEL, "test_rapid_process")
        .with_description("Processes jobs instantly; activate it to try the engine")
        .with_active(false);
    let created = ApplicationRepository::create(&application).await?;
    tracing::info!(application = %created.id, "Created demo application");

    Ok(())
}

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use actors::{EngineConfig, FnHandler, HandlerOutcome, HandlerResult, JobHandlerRegistry};
use db::{DbConfig, DbError};
use integration_core::{Application, JobId};

pub const MODEL: &str = "test.integration";

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    reset_db().await?;
    Ok(guard)
}

pub async fn reset_db() -> Result<(), DbError> {
    let db_conn = db::get_db()?;
    db_conn.query("DELETE job; DELETE application;").await?;
    Ok(())
}

/// Fast polling, no global worker unless a test enables it.
pub fn config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(25))
        .with_global_poll_interval(Duration::from_millis(25))
        .with_global_worker(false)
}

pub fn application(name: &str, function: &str) -> Application {
    Application::new(name, "admin", MODEL, function)
}

/// Ids of jobs the `ok` and `slow` handlers processed, in call order.
#[derive(Clone, Default)]
pub struct Seen(Arc<StdMutex<Vec<JobId>>>);

impl Seen {
    pub fn push(&self, id: JobId) {
        if let Ok(mut ids) = self.0.lock() {
            ids.push(id);
        }
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.0.lock().map(|ids| ids.clone()).unwrap_or_default()
    }
}

fn explode() -> HandlerResult {
    panic!("handler exploded")
}

pub fn registry(seen: Seen) -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();

    let ok_seen = seen.clone();
    registry.register(FnHandler::new(MODEL, "ok", move |job, _| {
        let seen = ok_seen.clone();
        let id = job.id;
        let data = job.data.clone().unwrap_or_default();
        Box::pin(async move {
            seen.push(id);
            HandlerResult::Ok(HandlerOutcome::ok(format!("processed {data}")))
        })
    }));

    registry.register(FnHandler::new(MODEL, "fail", |_, _| {
        Box::pin(async { HandlerResult::Ok(HandlerOutcome::failed("rejected by remote")) })
    }));

    registry.register(FnHandler::new(MODEL, "fault", |_, _| {
        Box::pin(async { HandlerResult::Err("socket closed".to_string()) })
    }));

    registry.register(FnHandler::new(MODEL, "panic", |_, _| {
        Box::pin(async { explode() })
    }));

    registry.register(FnHandler::new(MODEL, "slow", move |job, _| {
        let seen = seen.clone();
        let id = job.id;
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            seen.push(id);
            HandlerResult::Ok(HandlerOutcome::ok("slow done"))
        })
    }));

    registry
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

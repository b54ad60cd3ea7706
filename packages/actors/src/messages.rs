//! Message types for actor communication.

use integration_core::{ApplicationId, EngineEvent, RunToken};
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one poll cycle.
    Poll,
}

/// Which applications a worker polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "application_id", rename_all = "snake_case")]
pub enum WorkerScope {
    /// Every active application.
    Global,
    /// A single application, bound through its run token.
    Application(ApplicationId),
}

impl WorkerScope {
    pub fn application_id(&self) -> Option<ApplicationId> {
        match self {
            WorkerScope::Global => None,
            WorkerScope::Application(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for WorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerScope::Global => write!(f, "global"),
            WorkerScope::Application(id) => write!(f, "application {}", id),
        }
    }
}

/// A worker known to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub token: RunToken,
    pub name: String,
    pub scope: WorkerScope,
    /// The actor is running and has not been asked to stop.
    pub alive: bool,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Start a worker for an application.
    StartApplication {
        application_id: ApplicationId,
        reply: RpcReplyPort<Result<RunToken, ActorError>>,
    },

    /// Stop the worker running under a token. Unknown tokens are ignored.
    StopWorker {
        token: RunToken,
        reply: RpcReplyPort<()>,
    },

    /// Stop whatever worker an application currently points at.
    StopApplication {
        application_id: ApplicationId,
        reply: RpcReplyPort<Result<(), ActorError>>,
    },

    /// Whether a live worker holds the application's current run token.
    IsRunning {
        application_id: ApplicationId,
        reply: RpcReplyPort<ActorResult<bool>>,
    },

    /// List registered workers.
    ListWorkers { reply: RpcReplyPort<Vec<WorkerInfo>> },

    /// Release stale claims, restart autostart applications and start the
    /// global worker if enabled.
    Boot {
        reply: RpcReplyPort<Result<Vec<RunToken>, ActorError>>,
    },

    /// Subscribe to events.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<EngineEvent>>,
    },

    /// Drain every worker, then stop.
    Shutdown { reply: RpcReplyPort<()> },
}

/// Result type for supervisor operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActorError {
    #[error("Application not found: {0}")]
    NotFound(ApplicationId),

    #[error("Application {0} already has a running worker")]
    AlreadyRunning(ApplicationId),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl From<db::DbError> for ActorError {
    fn from(e: db::DbError) -> Self {
        ActorError::Database(e.to_string())
    }
}

//! Actor system for the integration engine.
//!
//! This crate provides the Ractor-based supervisor and workers that claim
//! ready jobs and hand them to registered handlers.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the running workers
//! - `WorkerActor` - Polls for ready jobs of one application, or of all
//!   active applications for the global worker
//!
//! # Usage
//!
//! ```ignore
//! use actors::{EngineConfig, JobHandlerRegistry, start_supervisor};
//!
//! let (supervisor, _join) = start_supervisor(handlers, EngineConfig::from_env()?).await?;
//! supervisor.boot().await?;
//! let token = supervisor.start(application_id).await?;
//! supervisor.stop(token).await?;
//! ```

mod config;
mod handler;
mod messages;
mod supervisor;
mod worker_actor;

pub use config::{ConfigError, EngineConfig};
pub use handler::{
    Dispatch, DispatchError, FnHandler, HandlerFuture, HandlerOutcome, HandlerResult, JobHandler,
    JobHandlerRegistry, dispatch,
};
pub use messages::{
    ActorError, ActorResult, SupervisorMessage, WorkerInfo, WorkerMessage, WorkerScope,
};
pub use supervisor::{Supervisor, SupervisorArgs, SupervisorHandle, start_supervisor};
pub use worker_actor::{StopSignal, WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};

//! Core domain types for the application integration engine.
//!
//! This crate contains shared types used across all packages:
//! - Application, the registered handler target that owns jobs
//! - Job, JobState and JobOutcome for work items
//! - Events for observing workers and job processing

mod application;
mod error;
mod events;
mod job;
mod pretty;

pub use application::{Application, ApplicationId, HandlerKey, RunToken};
pub use error::CoreError;
pub use events::EngineEvent;
pub use job::{
    HANDLER_FAULT_MESSAGE, Job, JobId, JobOutcome, JobState, UNRESOLVED_HANDLER_MESSAGE,
};
pub use pretty::pretty_xml;

//! Errors raised by domain types.

use thiserror::Error;

use crate::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown job state: {0}")]
    UnknownState(String),

    #[error("jobs cannot be created in state {0}")]
    InvalidInitialState(JobState),
}

//! Job domain types for work items processed by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{ApplicationId, CoreError};

/// Message recorded when an application's handler target cannot be resolved.
pub const UNRESOLVED_HANDLER_MESSAGE: &str =
    "No handler is registered for this application's model and function";

/// Message recorded when a handler fails unexpectedly. The fault itself is
/// only written to the logs.
pub const HANDLER_FAULT_MESSAGE: &str =
    "The handler failed unexpectedly while processing this job; see the server logs";

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a job in its lifecycle.
///
/// ```text
/// draft -> ready -> done | error
/// any   -> cancel
/// error -> ready            (manual re-queue only)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created but not yet released for processing.
    #[default]
    Draft,
    /// Waiting to be claimed by a worker.
    Ready,
    /// Cancelled by an operator.
    Cancel,
    /// Handler reported success.
    Done,
    /// Handler reported failure, faulted, or could not be resolved.
    Error,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Draft,
        JobState::Ready,
        JobState::Cancel,
        JobState::Done,
        JobState::Error,
    ];

    /// Get the stored name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Draft => "draft",
            JobState::Ready => "ready",
            JobState::Cancel => "cancel",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }

    /// Only ready jobs may be claimed by a worker.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Ready)
    }

    /// States a producer may create a job in.
    pub fn is_initial(&self) -> bool {
        matches!(self, JobState::Draft | JobState::Ready)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Cancel, Cancel) => false,
            (_, Cancel) => true,
            (Draft, Ready) | (Error, Ready) => true,
            (Ready, Done) | (Ready, Error) => true,
            _ => false,
        }
    }

    /// States from which `next` is reachable.
    pub fn sources_of(next: JobState) -> Vec<JobState> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::UnknownState(s.to_string()))
    }
}

/// Final result written back for a claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum JobOutcome {
    Done(String),
    Error(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Done(_) => JobState::Done,
            JobOutcome::Error(_) => JobState::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobOutcome::Done(message) | JobOutcome::Error(message) => message,
        }
    }

    /// Outcome for a handler that reported `(success, message)`.
    pub fn from_handler(success: bool, message: impl Into<String>) -> Self {
        if success {
            JobOutcome::Done(message.into())
        } else {
            JobOutcome::Error(message.into())
        }
    }

    pub fn unresolved() -> Self {
        JobOutcome::Error(UNRESOLVED_HANDLER_MESSAGE.to_string())
    }

    pub fn fault() -> Self {
        JobOutcome::Error(HANDLER_FAULT_MESSAGE.to_string())
    }
}

/// A durable unit of work belonging to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The application whose handler processes this job.
    pub application_id: ApplicationId,
    /// Current state.
    pub state: JobState,
    /// Payload handed to the handler, often XML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Outcome or diagnostic text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// An in-flight claim currently holds this job.
    #[serde(default)]
    pub claimed: bool,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new draft job.
    pub fn new(application_id: ApplicationId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            application_id,
            state: JobState::Draft,
            data: None,
            message: None,
            claimed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the payload.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Shorthand for a job queued for processing straight away.
    pub fn ready(application_id: ApplicationId) -> Self {
        Self {
            state: JobState::Ready,
            ..Self::new(application_id)
        }
    }

    /// Indented rendering of `data` when it is well-formed XML, `data` verbatim
    /// otherwise.
    pub fn pretty_data(&self) -> Option<String> {
        let data = self.data.as_deref()?;
        Some(crate::pretty::pretty_xml(data).unwrap_or_else(|| data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_the_only_claimable_state() {
        for state in JobState::ALL {
            assert_eq!(state.is_claimable(), state == JobState::Ready);
        }
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        assert!(JobState::Draft.can_transition_to(JobState::Ready));
        assert!(JobState::Ready.can_transition_to(JobState::Done));
        assert!(JobState::Ready.can_transition_to(JobState::Error));
        assert!(JobState::Error.can_transition_to(JobState::Ready));
        assert!(JobState::Done.can_transition_to(JobState::Cancel));

        assert!(!JobState::Draft.can_transition_to(JobState::Done));
        assert!(!JobState::Done.can_transition_to(JobState::Ready));
        assert!(!JobState::Cancel.can_transition_to(JobState::Ready));
        assert!(!JobState::Cancel.can_transition_to(JobState::Cancel));
    }

    #[test]
    fn sources_of_ready_are_draft_and_error() {
        assert_eq!(
            JobState::sources_of(JobState::Ready),
            vec![JobState::Draft, JobState::Error]
        );
    }

    #[test]
    fn state_names_parse_back() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().ok(), Some(state));
        }
        assert!("claimed".parse::<JobState>().is_err());
    }

    #[test]
    fn outcome_maps_handler_result() {
        assert_eq!(
            JobOutcome::from_handler(true, "ok"),
            JobOutcome::Done("ok".into())
        );
        let failed = JobOutcome::from_handler(false, "bad input");
        assert_eq!(failed.state(), JobState::Error);
        assert_eq!(failed.message(), "bad input");
        assert_eq!(JobOutcome::fault().message(), HANDLER_FAULT_MESSAGE);
    }

    #[test]
    fn pretty_data_falls_back_to_raw_text() {
        let job = Job::new(ApplicationId::new()).with_data("bla bla");
        assert_eq!(job.pretty_data().as_deref(), Some("bla bla"));
        assert_eq!(Job::new(ApplicationId::new()).pretty_data(), None);
    }
}

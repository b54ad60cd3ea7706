//! Event types for observing the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApplicationId, JobId, JobState, RunToken};

/// Events emitted by workers and the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    // Worker events
    /// A worker began polling. `application_id` is `None` for the global worker.
    WorkerStarted {
        token: RunToken,
        application_id: Option<ApplicationId>,
        timestamp: DateTime<Utc>,
    },
    /// A worker exited after finishing its last cycle.
    WorkerStopped {
        token: RunToken,
        application_id: Option<ApplicationId>,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A worker obtained the exclusive claim on a job.
    JobClaimed {
        job_id: JobId,
        application_id: ApplicationId,
        token: RunToken,
        timestamp: DateTime<Utc>,
    },
    /// A claimed job was resolved and its claim released.
    JobFinished {
        job_id: JobId,
        application_id: ApplicationId,
        state: JobState,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::WorkerStarted { timestamp, .. } => *timestamp,
            EngineEvent::WorkerStopped { timestamp, .. } => *timestamp,
            EngineEvent::JobClaimed { timestamp, .. } => *timestamp,
            EngineEvent::JobFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EngineEvent::JobClaimed { job_id, .. } => Some(*job_id),
            EngineEvent::JobFinished { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get the worker token associated with this event, if any.
    pub fn token(&self) -> Option<RunToken> {
        match self {
            EngineEvent::WorkerStarted { token, .. } => Some(*token),
            EngineEvent::WorkerStopped { token, .. } => Some(*token),
            EngineEvent::JobClaimed { token, .. } => Some(*token),
            EngineEvent::JobFinished { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            EngineEvent::WorkerStarted {
                token,
                application_id,
                ..
            } => match application_id {
                Some(app) => format!("Worker {} started for application {}", token, app),
                None => format!("Global worker {} started", token),
            },
            EngineEvent::WorkerStopped { token, .. } => format!("Worker {} stopped", token),
            EngineEvent::JobClaimed { job_id, token, .. } => {
                format!("Job {} claimed by {}", job_id, token)
            }
            EngineEvent::JobFinished { job_id, state, .. } => {
                format!("Job {} -> {}", job_id, state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let token = RunToken::new();
        let started = EngineEvent::WorkerStarted {
            token,
            application_id: None,
            timestamp: Utc::now(),
        };
        assert_eq!(started.token(), Some(token));
        assert_eq!(started.job_id(), None);
        assert!(started.description().starts_with("Global worker"));
    }

    #[test]
    fn test_event_wire_format() {
        let job_id = JobId::new();
        let event = EngineEvent::JobFinished {
            job_id,
            application_id: ApplicationId::new(),
            state: JobState::Done,
            message: Some("sent".into()),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "job_finished");
        assert_eq!(value["state"], "done");
        assert_eq!(value["job_id"], job_id.to_string());

        let back: EngineEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.job_id(), Some(job_id));
    }
}

//! Job repository: producer operations and the worker claim protocol.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use integration_core::{ApplicationId, CoreError, Job, JobId, JobOutcome, JobState};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::repositories::ApplicationRepository;
use crate::{DbError, get_db};

/// Repository for job persistence operations.
pub struct JobRepository;

/// Serializes writes that read and then change a job's state or claim.
///
/// The embedded engines do not reject two concurrent conditional updates of
/// the same row, so two claimers could both see `claim_token = NONE` and both
/// win. Every such write takes this gate for the duration of its query.
static JOB_WRITES: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    id: Thing,
    application_id: String,
    state: String,
    data: Option<String>,
    message: Option<String>,
    claim_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        let raw_id = self.id.id.to_raw();
        let id = JobId::parse(&raw_id)
            .map_err(|e| DbError::Serialization(format!("job id {raw_id}: {e}")))?;
        let application_id = ApplicationId::parse(&self.application_id).map_err(|e| {
            DbError::Serialization(format!("application id {}: {e}", self.application_id))
        })?;

        Ok(Job {
            id,
            application_id,
            state: self.state.parse()?,
            data: self.data,
            message: self.message,
            claimed: self.claim_token.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: Thing,
}

/// Struct for creating jobs - omits datetime fields so SurrealDB defaults apply.
#[derive(Debug, Clone, Serialize)]
struct JobCreate {
    application_id: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Input for [`JobRepository::create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub application_id: ApplicationId,
    pub state: JobState,
    pub data: Option<String>,
}

impl NewJob {
    /// A draft job for the given application.
    pub fn draft(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            state: JobState::Draft,
            data: None,
        }
    }

    /// A job queued for processing straight away.
    pub fn ready(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            state: JobState::Ready,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Exclusive claim on a ready job, held from [`JobRepository::claim`] until
/// [`JobRepository::complete`] or [`JobRepository::release`].
#[must_use = "a claim must be completed or released"]
#[derive(Debug, Clone)]
pub struct JobClaim {
    job: Job,
    token: Ulid,
}

impl JobClaim {
    /// The job as it was when the claim was taken.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }
}

impl JobRepository {
    /// Create a job in `draft` or `ready`.
    pub async fn create(new_job: NewJob) -> Result<Job, DbError> {
        if !new_job.state.is_initial() {
            return Err(CoreError::InvalidInitialState(new_job.state).into());
        }

        let db = get_db()?;
        let id = JobId::new();

        let create_data = JobCreate {
            application_id: new_job.application_id.to_string(),
            state: new_job.state.as_str().to_string(),
            data: new_job.data,
        };

        let record: Option<JobRecord> = db
            .create(("job", id.to_string()))
            .content(create_data)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<JobRecord> = db.select(("job", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// List jobs of one application, oldest first.
    pub async fn list_by_application(application_id: ApplicationId) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM job WHERE application_id = $application ORDER BY id ASC")
            .bind(("application", application_id.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// List jobs in one state, oldest first.
    pub async fn list_by_state(state: JobState) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM job WHERE state = $state ORDER BY id ASC")
            .bind(("state", state.as_str()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        into_jobs(records)
    }

    /// Move jobs to `ready`. Only `draft` jobs and `error` jobs (manual
    /// re-queue) are affected. Returns the number of jobs moved.
    pub async fn mark_ready(ids: &[JobId]) -> Result<usize, DbError> {
        if ids.is_empty() {
            return Err(DbError::Validation(
                "Select at least one job to mark as ready".into(),
            ));
        }

        let db = get_db()?;
        let sources: Vec<&str> = JobState::sources_of(JobState::Ready)
            .iter()
            .map(JobState::as_str)
            .collect();

        let _gate = JOB_WRITES.lock().await;
        let mut moved = 0;
        for id in ids {
            let mut result = db
                .query("UPDATE type::thing('job', $id) SET state = 'ready', updated_at = time::now() WHERE state INSIDE $sources RETURN AFTER")
                .bind(("id", id.to_string()))
                .bind(("sources", sources.clone()))
                .await?;

            let records: Vec<JobRecord> = result.take(0)?;
            moved += records.len();
        }

        tracing::info!(requested = ids.len(), moved, "Jobs marked ready");

        Ok(moved)
    }

    /// Cancel jobs with a mandatory reason. Jobs already cancelled are left
    /// untouched. Returns the number of jobs cancelled.
    pub async fn cancel(ids: &[JobId], reason: &str) -> Result<usize, DbError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DbError::Validation(
                "A reason is required to cancel jobs".into(),
            ));
        }
        if ids.is_empty() {
            return Err(DbError::Validation("Select at least one job to cancel".into()));
        }

        let db = get_db()?;
        let message = format!("Cancelled. Reason for change: {reason}");

        let _gate = JOB_WRITES.lock().await;
        let mut cancelled = 0;
        for id in ids {
            let mut result = db
                .query("UPDATE type::thing('job', $id) SET state = 'cancel', message = $message, updated_at = time::now() WHERE state != 'cancel' RETURN AFTER")
                .bind(("id", id.to_string()))
                .bind(("message", message.clone()))
                .await?;

            let records: Vec<JobRecord> = result.take(0)?;
            cancelled += records.len();
        }

        tracing::info!(requested = ids.len(), cancelled, "Jobs cancelled");

        Ok(cancelled)
    }

    /// Ids of unclaimed `ready` jobs belonging to active applications in
    /// `application_ids`, in creation order.
    pub async fn find_ready(application_ids: &[ApplicationId]) -> Result<Vec<JobId>, DbError> {
        if application_ids.is_empty() {
            return Ok(Vec::new());
        }

        let active: HashSet<ApplicationId> = ApplicationRepository::list_active()
            .await?
            .into_iter()
            .map(|app| app.id)
            .collect();

        let eligible: Vec<String> = application_ids
            .iter()
            .filter(|id| active.contains(id))
            .map(ToString::to_string)
            .collect();

        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let db = get_db()?;

        let mut result = db
            .query("SELECT id FROM job WHERE state = 'ready' AND claim_token = NONE AND application_id INSIDE $applications ORDER BY id ASC")
            .bind(("applications", eligible))
            .await?;

        let records: Vec<IdRecord> = result.take(0)?;

        let mut ids = records
            .into_iter()
            .map(|r| {
                let raw = r.id.id.to_raw();
                JobId::parse(&raw).map_err(|e| DbError::Serialization(format!("job id {raw}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();

        Ok(ids)
    }

    /// Try to take the exclusive claim on a job without waiting.
    ///
    /// Returns `None` if the job is no longer `ready`, is already claimed, or
    /// a concurrent writer won the row.
    pub async fn claim(id: JobId) -> Result<Option<JobClaim>, DbError> {
        let db = get_db()?;
        let token = Ulid::new();

        let _gate = JOB_WRITES.lock().await;
        let response = db
            .query("UPDATE type::thing('job', $id) SET claim_token = $claim, claimed_at = time::now() WHERE state = 'ready' AND claim_token = NONE RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("claim", token.to_string()))
            .await;

        let records: Result<Vec<JobRecord>, DbError> = match response {
            Ok(mut response) => response.take(0).map_err(DbError::from),
            Err(e) => Err(e.into()),
        };

        let records = match records {
            Ok(records) => records,
            Err(e) if e.is_conflict() => {
                tracing::debug!(job = %id, "Claim lost to a concurrent writer");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match records.into_iter().next() {
            Some(record) => Ok(Some(JobClaim {
                job: record.into_job()?,
                token,
            })),
            None => Ok(None),
        }
    }

    /// Write the outcome of a claimed job and release the claim.
    ///
    /// Returns the updated job, or `None` if the job was cancelled while it
    /// was claimed. In that case the cancellation stands and only the claim
    /// is released.
    pub async fn complete(claim: &JobClaim, outcome: &JobOutcome) -> Result<Option<Job>, DbError> {
        let db = get_db()?;
        let _gate = JOB_WRITES.lock().await;

        let mut result = db
            .query("UPDATE type::thing('job', $id) SET state = $state, message = $message, claim_token = NONE, claimed_at = NONE, updated_at = time::now() WHERE claim_token = $claim AND state = 'ready' RETURN AFTER")
            .bind(("id", claim.job.id.to_string()))
            .bind(("state", outcome.state().as_str()))
            .bind(("message", outcome.message().to_string()))
            .bind(("claim", claim.token.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        if let Some(record) = records.into_iter().next() {
            return Ok(Some(record.into_job()?));
        }

        release_claim(claim).await?;
        tracing::info!(job = %claim.job.id, "Outcome discarded, job changed while claimed");

        Ok(None)
    }

    /// Release a claim without touching the job's state.
    pub async fn release(claim: &JobClaim) -> Result<(), DbError> {
        let _gate = JOB_WRITES.lock().await;
        release_claim(claim).await
    }

    /// Release every claim older than `lease`. Returns the number released.
    ///
    /// Claims left behind by a process that died mid-job would otherwise
    /// hide those jobs from every worker.
    pub async fn release_stale_claims(lease: Duration) -> Result<usize, DbError> {
        let db = get_db()?;
        let _gate = JOB_WRITES.lock().await;

        let mut result = db
            .query("UPDATE job SET claim_token = NONE, claimed_at = NONE WHERE claim_token != NONE AND claimed_at < time::now() - duration::from::secs($secs) RETURN AFTER")
            .bind(("secs", lease.as_secs()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        if !records.is_empty() {
            tracing::warn!(released = records.len(), "Released stale job claims");
        }

        Ok(records.len())
    }
}

/// Clear a claim if it is still the one on the row. Callers hold the gate.
async fn release_claim(claim: &JobClaim) -> Result<(), DbError> {
    let db = get_db()?;

    db.query("UPDATE type::thing('job', $id) SET claim_token = NONE, claimed_at = NONE WHERE claim_token = $claim")
        .bind(("id", claim.job.id.to_string()))
        .bind(("claim", claim.token.to_string()))
        .await?
        .check()?;

    Ok(())
}

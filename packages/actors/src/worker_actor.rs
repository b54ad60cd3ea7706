//! Worker actor that polls for ready jobs and runs their handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use db::DbError;
use db::repositories::{ApplicationRepository, JobClaim, JobRepository};
use integration_core::{Application, ApplicationId, EngineEvent, JobId, RunToken};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::handler::{JobHandlerRegistry, dispatch};
use crate::messages::{WorkerMessage, WorkerScope};

/// Cooperative stop flag shared between a worker and its supervisor.
///
/// Checked at the top of each cycle and before each claim. A handler that is
/// already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub name: String,
    pub scope: WorkerScope,
    pub token: RunToken,
    pub poll_interval: Duration,
    pub handlers: Arc<JobHandlerRegistry>,
    pub stop: StopSignal,
    pub event_tx: Option<broadcast::Sender<EngineEvent>>,
}

/// State for the worker actor.
pub struct WorkerState {
    pub name: String,
    pub scope: WorkerScope,
    pub token: RunToken,
    poll_interval: Duration,
    handlers: Arc<JobHandlerRegistry>,
    stop: StopSignal,
    event_tx: Option<broadcast::Sender<EngineEvent>>,
}

impl WorkerState {
    fn emit(&self, event: EngineEvent) {
        tracing::trace!(worker = %self.name, "{}", event.description());
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

enum Cycle {
    Continue,
    Stop(&'static str),
}

enum Eligible {
    Applications(Vec<Application>),
    Unbound(&'static str),
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker = %args.name, scope = %args.scope, "Starting worker");

        let state = WorkerState {
            name: args.name,
            scope: args.scope,
            token: args.token,
            poll_interval: args.poll_interval,
            handlers: args.handlers,
            stop: args.stop,
            event_tx: args.event_tx,
        };

        state.emit(EngineEvent::WorkerStarted {
            token: state.token,
            application_id: state.scope.application_id(),
            timestamp: Utc::now(),
        });

        myself.send_message(WorkerMessage::Poll)?;

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.stop.is_set() {
                    myself.stop(Some("stop requested".into()));
                    return Ok(());
                }

                match run_cycle(state).await {
                    Cycle::Continue if !state.stop.is_set() => {
                        let me = myself.clone();
                        let interval = state.poll_interval;
                        tokio::spawn(async move {
                            tokio::time::sleep(interval).await;
                            let _ = me.send_message(WorkerMessage::Poll);
                        });
                    }
                    Cycle::Continue => {
                        myself.stop(Some("stop requested".into()));
                    }
                    Cycle::Stop(reason) => {
                        tracing::info!(worker = %state.name, "Worker stopping: {}", reason);
                        myself.stop(Some(reason.into()));
                    }
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(worker = %state.name, "Worker stopped");
        state.emit(EngineEvent::WorkerStopped {
            token: state.token,
            application_id: state.scope.application_id(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

async fn eligible_applications(state: &WorkerState) -> Result<Eligible, DbError> {
    match state.scope {
        WorkerScope::Global => Ok(Eligible::Applications(
            ApplicationRepository::list_active().await?,
        )),
        WorkerScope::Application(id) => {
            let Some(app) = ApplicationRepository::find(id).await? else {
                return Ok(Eligible::Unbound("application deleted"));
            };
            if !app.active {
                return Ok(Eligible::Unbound("application deactivated"));
            }
            if !app.is_claimed_by(state.token) {
                return Ok(Eligible::Unbound("run token replaced"));
            }
            Ok(Eligible::Applications(vec![app]))
        }
    }
}

/// Ready job ids ordered by application priority, then creation order.
async fn candidates(applications: &[Application]) -> Result<Vec<JobId>, DbError> {
    let mut by_priority: Vec<&Application> = applications.iter().collect();
    by_priority.sort_by_key(|app| app.priority);

    let mut ids = Vec::new();
    for group in by_priority.chunk_by(|a, b| a.priority == b.priority) {
        let group_ids: Vec<ApplicationId> = group.iter().map(|app| app.id).collect();
        ids.extend(JobRepository::find_ready(&group_ids).await?);
    }
    Ok(ids)
}

async fn run_cycle(state: &WorkerState) -> Cycle {
    let applications = match eligible_applications(state).await {
        Ok(Eligible::Applications(apps)) => apps,
        Ok(Eligible::Unbound(reason)) => return Cycle::Stop(reason),
        Err(e) => {
            tracing::warn!(worker = %state.name, "Failed to load applications: {}", e);
            return Cycle::Continue;
        }
    };

    let ids = match candidates(&applications).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(worker = %state.name, "Failed to search ready jobs: {}", e);
            return Cycle::Continue;
        }
    };

    if ids.is_empty() {
        return Cycle::Continue;
    }
    tracing::debug!(worker = %state.name, candidates = ids.len(), "Processing ready jobs");

    let applications: HashMap<ApplicationId, Application> =
        applications.into_iter().map(|app| (app.id, app)).collect();

    for id in ids {
        if state.stop.is_set() {
            break;
        }

        let claim = match JobRepository::claim(id).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                tracing::debug!(worker = %state.name, job = %id, "Job taken by another worker");
                continue;
            }
            Err(e) => {
                tracing::warn!(worker = %state.name, job = %id, "Failed to claim job: {}", e);
                continue;
            }
        };

        process(state, &applications, claim).await;
    }

    Cycle::Continue
}

async fn process(
    state: &WorkerState,
    applications: &HashMap<ApplicationId, Application>,
    claim: JobClaim,
) {
    let job = claim.job();

    let Some(application) = applications.get(&job.application_id) else {
        release(state, &claim).await;
        return;
    };

    state.emit(EngineEvent::JobClaimed {
        job_id: job.id,
        application_id: application.id,
        token: state.token,
        timestamp: Utc::now(),
    });

    let outcome = dispatch(&state.handlers, job, application).await.outcome();

    match JobRepository::complete(&claim, &outcome).await {
        Ok(Some(done)) => {
            tracing::debug!(worker = %state.name, job = %done.id, state = %done.state, "Job finished");
            state.emit(EngineEvent::JobFinished {
                job_id: done.id,
                application_id: done.application_id,
                state: done.state,
                message: done.message,
                timestamp: Utc::now(),
            });
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(worker = %state.name, job = %job.id, "Failed to record outcome: {}", e);
            release(state, &claim).await;
        }
    }
}

async fn release(state: &WorkerState, claim: &JobClaim) {
    if let Err(e) = JobRepository::release(claim).await {
        tracing::warn!(worker = %state.name, job = %claim.job_id(), "Failed to release claim: {}", e);
    }
}

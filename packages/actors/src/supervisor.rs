//! Supervisor actor that owns the set of running workers.

use std::collections::HashMap;
use std::sync::Arc;

use db::repositories::{ApplicationRepository, JobRepository};
use integration_core::{ApplicationId, EngineEvent, RunToken};
use ractor::{
    Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, ActorStatus, RpcReplyPort,
    SupervisionEvent,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::handler::JobHandlerRegistry;
use crate::messages::{ActorError, ActorResult, SupervisorMessage, WorkerInfo, WorkerMessage, WorkerScope};
use crate::worker_actor::{StopSignal, WorkerActor, WorkerArgs};

/// A worker spawned by the supervisor.
struct WorkerEntry {
    name: String,
    scope: WorkerScope,
    actor: ActorRef<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    stop: StopSignal,
}

impl WorkerEntry {
    fn is_alive(&self) -> bool {
        !self.stop.is_set()
            && !matches!(
                self.actor.get_status(),
                ActorStatus::Stopping | ActorStatus::Stopped
            )
    }
}

/// Arguments for the supervisor actor.
pub struct SupervisorArgs {
    pub handlers: JobHandlerRegistry,
    pub config: EngineConfig,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    workers: HashMap<RunToken, WorkerEntry>,
    actors: HashMap<ActorId, RunToken>,
    handlers: Arc<JobHandlerRegistry>,
    config: EngineConfig,
    /// Event broadcaster.
    event_tx: broadcast::Sender<EngineEvent>,
}

impl SupervisorState {
    /// Create a new supervisor state.
    pub fn new(args: SupervisorArgs) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            workers: HashMap::new(),
            actors: HashMap::new(),
            handlers: Arc::new(args.handlers),
            config: args.config,
            event_tx,
        }
    }

    fn live_worker_for(&self, application_id: ApplicationId) -> Option<RunToken> {
        self.workers
            .iter()
            .find(|(_, entry)| {
                entry.scope == WorkerScope::Application(application_id) && entry.is_alive()
            })
            .map(|(token, _)| *token)
    }

    /// A live worker holds the token the application currently points at.
    async fn is_running(&self, application_id: ApplicationId) -> ActorResult<bool> {
        let Some(application) = ApplicationRepository::find(application_id).await? else {
            return Ok(false);
        };

        Ok(application
            .thread_token
            .and_then(|token| self.workers.get(&token))
            .is_some_and(|entry| {
                entry.scope == WorkerScope::Application(application_id) && entry.is_alive()
            }))
    }

    fn global_running(&self) -> bool {
        self.workers
            .values()
            .any(|entry| entry.scope == WorkerScope::Global && entry.is_alive())
    }

    async fn spawn_worker(
        &mut self,
        supervisor: ActorCell,
        scope: WorkerScope,
        token: RunToken,
    ) -> ActorResult<()> {
        let name = match scope {
            WorkerScope::Global => format!("global-worker-{token}"),
            WorkerScope::Application(_) => format!("app-worker-{token}"),
        };
        let poll_interval = match scope {
            WorkerScope::Global => self.config.global_poll_interval,
            WorkerScope::Application(_) => self.config.poll_interval,
        };
        let stop = StopSignal::new();

        let args = WorkerArgs {
            name: name.clone(),
            scope,
            token,
            poll_interval,
            handlers: self.handlers.clone(),
            stop: stop.clone(),
            event_tx: Some(self.event_tx.clone()),
        };

        let (actor, handle) = Actor::spawn_linked(Some(name.clone()), WorkerActor, args, supervisor)
            .await
            .map_err(|e| ActorError::Spawn(e.to_string()))?;

        self.actors.insert(actor.get_id(), token);
        self.workers.insert(
            token,
            WorkerEntry {
                name,
                scope,
                actor,
                handle: Some(handle),
                stop,
            },
        );

        Ok(())
    }

    async fn start_application(
        &mut self,
        supervisor: ActorCell,
        application_id: ApplicationId,
    ) -> ActorResult<RunToken> {
        if ApplicationRepository::find(application_id).await?.is_none() {
            return Err(ActorError::NotFound(application_id));
        }
        if self.live_worker_for(application_id).is_some() {
            return Err(ActorError::AlreadyRunning(application_id));
        }

        let token = RunToken::new();
        ApplicationRepository::set_thread_token(application_id, token).await?;

        if let Err(e) = self
            .spawn_worker(supervisor, WorkerScope::Application(application_id), token)
            .await
        {
            tracing::error!(application = %application_id, "{}", e);
            if let Err(db_err) = ApplicationRepository::clear_thread_token_if(application_id, token).await {
                tracing::warn!(application = %application_id, "Failed to clear run token: {}", db_err);
            }
            return Err(e);
        }

        tracing::info!(application = %application_id, token = %token, "Worker started");
        Ok(token)
    }

    /// Signal the worker under `token` and clear its application's token.
    /// Unknown tokens are ignored.
    async fn stop_worker(&mut self, token: RunToken) {
        let Some(entry) = self.workers.get(&token) else {
            return;
        };

        if !entry.stop.is_set() {
            tracing::info!(worker = %entry.name, "Stopping worker");
        }
        entry.stop.signal();
        entry.actor.stop(Some("stop requested".into()));

        if let WorkerScope::Application(application_id) = entry.scope
            && let Err(e) = ApplicationRepository::clear_thread_token_if(application_id, token).await
        {
            tracing::warn!(application = %application_id, "Failed to clear run token: {}", e);
        }
    }

    async fn stop_application(&mut self, application_id: ApplicationId) -> ActorResult<()> {
        let application = ApplicationRepository::find(application_id)
            .await?
            .ok_or(ActorError::NotFound(application_id))?;

        if let Some(token) = application.thread_token {
            self.stop_worker(token).await;
        }
        ApplicationRepository::clear_thread_token(application_id).await?;

        // Workers whose token was already replaced still poll until their next
        // cycle; stop them now as well.
        let orphans: Vec<RunToken> = self
            .workers
            .iter()
            .filter(|(_, entry)| entry.scope == WorkerScope::Application(application_id))
            .map(|(token, _)| *token)
            .collect();
        for token in orphans {
            self.stop_worker(token).await;
        }

        Ok(())
    }

    async fn boot(&mut self, supervisor: ActorCell) -> ActorResult<Vec<RunToken>> {
        let released = JobRepository::release_stale_claims(self.config.claim_lease).await?;
        if released > 0 {
            tracing::info!(released, "Recovered jobs from stale claims");
        }

        let mut started = Vec::new();

        for application in ApplicationRepository::list_autostart().await? {
            if let Some(previous) = application.thread_token {
                self.stop_worker(previous).await;
            }
            ApplicationRepository::clear_thread_token(application.id).await?;

            match self.start_application(supervisor.clone(), application.id).await {
                Ok(token) => started.push(token),
                Err(e) => {
                    tracing::error!(application = %application.name, "Autostart failed: {}", e);
                }
            }
        }

        if self.config.global_worker && !self.global_running() {
            let token = RunToken::new();
            self.spawn_worker(supervisor, WorkerScope::Global, token).await?;
            tracing::info!(token = %token, "Global worker started");
            started.push(token);
        }

        Ok(started)
    }

    fn list_workers(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|(token, entry)| WorkerInfo {
                token: *token,
                name: entry.name.clone(),
                scope: entry.scope,
                alive: entry.is_alive(),
            })
            .collect();
        workers.sort_by_key(|w| w.token);
        workers
    }

    async fn forget(&mut self, actor_id: ActorId) {
        let Some(token) = self.actors.remove(&actor_id) else {
            return;
        };
        let Some(entry) = self.workers.remove(&token) else {
            return;
        };

        if let WorkerScope::Application(application_id) = entry.scope {
            match ApplicationRepository::clear_thread_token_if(application_id, token).await {
                Ok(true) => {
                    tracing::debug!(application = %application_id, "Cleared run token of exited worker")
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(application = %application_id, "Failed to clear run token: {}", e)
                }
            }
        }
    }
}

/// Supervisor actor that manages all workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(handlers = args.handlers.len(), "Starting integration supervisor");
        if args.handlers.is_empty() {
            tracing::warn!("No job handlers registered; every claimed job will error");
        }

        Ok(SupervisorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::StartApplication {
                application_id,
                reply,
            } => {
                let result = state.start_application(myself.get_cell(), application_id).await;
                let _ = reply.send(result);
            }

            SupervisorMessage::StopWorker { token, reply } => {
                state.stop_worker(token).await;
                let _ = reply.send(());
            }

            SupervisorMessage::StopApplication {
                application_id,
                reply,
            } => {
                let result = state.stop_application(application_id).await;
                let _ = reply.send(result);
            }

            SupervisorMessage::IsRunning {
                application_id,
                reply,
            } => {
                let result = state.is_running(application_id).await;
                let _ = reply.send(result);
            }

            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.list_workers());
            }

            SupervisorMessage::Boot { reply } => {
                let result = state.boot(myself.get_cell()).await;
                let _ = reply.send(result);
            }

            SupervisorMessage::Subscribe { reply } => {
                let _ = reply.send(state.event_tx.subscribe());
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down supervisor");

                let tokens: Vec<RunToken> = state.workers.keys().copied().collect();
                for token in &tokens {
                    state.stop_worker(*token).await;
                }

                // Wait for in-flight handlers to reach their boundary.
                for token in tokens {
                    let Some(entry) = state.workers.get_mut(&token) else {
                        continue;
                    };
                    if let Some(handle) = entry.handle.take()
                        && let Err(e) = handle.await
                    {
                        tracing::warn!(worker = %entry.name, "Worker task failed: {}", e);
                    }
                }

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!(
                    "Worker {} exited: {}",
                    cell.get_name().unwrap_or_default(),
                    reason.unwrap_or_default()
                );
                state.forget(cell.get_id()).await;
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::error!(
                    "Worker {} failed: {}",
                    cell.get_name().unwrap_or_default(),
                    err
                );
                state.forget(cell.get_id()).await;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Cloneable entry point to a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    actor: ActorRef<SupervisorMessage>,
}

impl SupervisorHandle {
    pub fn new(actor: ActorRef<SupervisorMessage>) -> Self {
        Self { actor }
    }

    async fn call<T>(&self, build: impl FnOnce(RpcReplyPort<T>) -> SupervisorMessage) -> ActorResult<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|e| ActorError::Actor(format!("Failed to send message: {}", e)))?;

        rx.await
            .map_err(|_| ActorError::Actor("Failed to receive response".into()))
    }

    /// Start a worker for an application and return its run token.
    pub async fn start(&self, application_id: ApplicationId) -> ActorResult<RunToken> {
        self.call(|reply| SupervisorMessage::StartApplication {
            application_id,
            reply,
        })
        .await?
    }

    /// Stop the worker under `token`. Unknown tokens are a no-op.
    pub async fn stop(&self, token: RunToken) -> ActorResult<()> {
        self.call(|reply| SupervisorMessage::StopWorker { token, reply })
            .await
    }

    /// Stop the worker an application currently points at and clear its token.
    pub async fn stop_application(&self, application_id: ApplicationId) -> ActorResult<()> {
        self.call(|reply| SupervisorMessage::StopApplication {
            application_id,
            reply,
        })
        .await?
    }

    /// Whether a live worker holds the application's current run token.
    pub async fn is_running(&self, application_id: ApplicationId) -> ActorResult<bool> {
        self.call(|reply| SupervisorMessage::IsRunning {
            application_id,
            reply,
        })
        .await?
    }

    pub async fn list_workers(&self) -> ActorResult<Vec<WorkerInfo>> {
        self.call(|reply| SupervisorMessage::ListWorkers { reply })
            .await
    }

    /// Recover stale claims and start autostart and global workers.
    pub async fn boot(&self) -> ActorResult<Vec<RunToken>> {
        self.call(|reply| SupervisorMessage::Boot { reply }).await?
    }

    pub async fn subscribe(&self) -> ActorResult<broadcast::Receiver<EngineEvent>> {
        self.call(|reply| SupervisorMessage::Subscribe { reply })
            .await
    }

    /// Stop every worker, wait for in-flight jobs, then stop the supervisor.
    pub async fn shutdown(&self) -> ActorResult<()> {
        self.call(|reply| SupervisorMessage::Shutdown { reply })
            .await
    }
}

/// Start the supervisor with the given handler registry and configuration.
pub async fn start_supervisor(
    handlers: JobHandlerRegistry,
    config: EngineConfig,
) -> ActorResult<(SupervisorHandle, JoinHandle<()>)> {
    let (actor, handle) = Actor::spawn(None, Supervisor, SupervisorArgs { handlers, config })
        .await
        .map_err(|e| ActorError::Spawn(e.to_string()))?;

    Ok((SupervisorHandle::new(actor), handle))
}

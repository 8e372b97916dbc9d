//! Orchestrator facade.
//!
//! Binds one job type and one execution mode to a job controller, a status
//! reconciler and a resume guard. Callers go through this type; the parts
//! stay reachable for embedders that need finer control.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use indexer_types::{BatchRequest, ExecutionMode, JobId, JobType, OrchestratorConfig, UiState};

use crate::collaborators::{BatchExecutor, ProgressSink, StatusProvider};
use crate::controller::{request_remote_stop, JobController, JobHandle, StartOptions};
use crate::error::OrchestratorError;
use crate::in_flight::InFlightGuard;
use crate::reconciler::StatusReconciler;
use crate::resume::{ResumeGuard, ResumeOutcome};
use crate::state::{JobState, JobStateStore, StopRequest};
use crate::stop_intent::{clear_intent, intent_is_set, persist_intent, StopIntentStore};

/// External collaborators an orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn BatchExecutor>,
    pub provider: Arc<dyn StatusProvider>,
    pub stop_intents: Arc<dyn StopIntentStore>,
    pub sink: Arc<dyn ProgressSink>,
}

/// Result of a successful start.
#[derive(Debug)]
pub enum StartedJob {
    /// Client-stepped loop running locally, with status polled beside it
    Stepped(JobHandle),
    /// Work enqueued on the server; the reconciler is watching it
    Queued(JobId),
    /// The server refused to enqueue anything for lack of credits
    Exhausted,
}

/// Entry point for one job type in one execution mode.
pub struct IndexingOrchestrator {
    job_type: JobType,
    mode: ExecutionMode,
    config: OrchestratorConfig,
    collaborators: Collaborators,
    store: Arc<JobStateStore>,
    controller: JobController,
    reconciler: StatusReconciler,
    guard: ResumeGuard,
    queue_start: InFlightGuard,
}

impl IndexingOrchestrator {
    /// Build an orchestrator with its own job state store.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidConfig` if the configuration fails
    /// validation.
    pub fn new(
        job_type: JobType,
        mode: ExecutionMode,
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        Self::with_store(
            job_type,
            mode,
            config,
            collaborators,
            Arc::new(JobStateStore::new()),
        )
    }

    /// Build an orchestrator sharing a job state store with others.
    pub fn with_store(
        job_type: JobType,
        mode: ExecutionMode,
        config: OrchestratorConfig,
        collaborators: Collaborators,
        store: Arc<JobStateStore>,
    ) -> Result<Self, OrchestratorError> {
        config.validate().map_err(OrchestratorError::InvalidConfig)?;

        let reconciler = StatusReconciler::new(
            job_type.clone(),
            collaborators.provider.clone(),
            collaborators.stop_intents.clone(),
            collaborators.sink.clone(),
            config.clone(),
        );
        let controller = JobController::new(
            collaborators.executor.clone(),
            store.clone(),
            collaborators.stop_intents.clone(),
            collaborators.sink.clone(),
            config.clone(),
        )
        .with_status_reconciler(reconciler.clone());
        let guard = ResumeGuard::new(
            job_type.clone(),
            mode,
            config.clone(),
            collaborators.provider.clone(),
            collaborators.stop_intents.clone(),
            collaborators.sink.clone(),
            controller.clone(),
            reconciler.clone(),
        );

        Ok(Self {
            job_type,
            mode,
            config,
            collaborators,
            store,
            controller,
            reconciler,
            guard,
            queue_start: InFlightGuard::new(),
        })
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStateStore> {
        &self.store
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    pub fn resume_guard(&self) -> &ResumeGuard {
        &self.guard
    }

    /// Snapshot of the live client-stepped job, if any.
    pub fn snapshot(&self) -> Option<JobState> {
        self.store.snapshot(&self.job_type)
    }

    /// Whether a loop, a poller or a queue kick-off is live for this type.
    pub fn is_busy(&self) -> bool {
        self.store.is_live(&self.job_type)
            || self.reconciler.is_polling()
            || self.queue_start.is_busy()
    }

    /// Run the start-up resume check. Call once before the first `start`.
    pub async fn check_and_resume(&self) -> Result<ResumeOutcome, OrchestratorError> {
        self.guard.check_and_resume().await
    }

    /// Start a new job.
    ///
    /// Every rejection happens before the first await, so a rejected start
    /// never touches the server.
    ///
    /// # Errors
    ///
    /// - `ResumeCheckPending` / `ResumeCheckInProgress` until the resume check
    ///   has completed
    /// - `JobAlreadyLive` while a loop, poller or kick-off is live
    /// - `InvalidConfig` for a zero batch size
    /// - `Collaborator` if the queue-mode kick-off call fails
    pub async fn start(&self, options: StartOptions) -> Result<StartedJob, OrchestratorError> {
        self.guard.ensure_ready()?;
        if self.reconciler.is_polling() {
            return Err(OrchestratorError::JobAlreadyLive(self.job_type.clone()));
        }

        match self.mode {
            ExecutionMode::ClientStepped => {
                let handle = self.controller.start(self.job_type.clone(), options)?;
                Ok(StartedJob::Stepped(handle))
            }
            ExecutionMode::Queue => self.start_queued(options).await,
        }
    }

    async fn start_queued(&self, options: StartOptions) -> Result<StartedJob, OrchestratorError> {
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        if self.store.is_live(&self.job_type) {
            return Err(OrchestratorError::JobAlreadyLive(self.job_type.clone()));
        }
        let Some(_kick_off) = self.queue_start.try_acquire() else {
            return Err(OrchestratorError::JobAlreadyLive(self.job_type.clone()));
        };

        let job_id = JobId::generate();
        clear_intent(self.collaborators.stop_intents.as_ref(), &self.job_type);
        info!(
            job_type = %self.job_type,
            job_id = %job_id,
            batch_size = batch_size,
            "Enqueueing indexing job"
        );
        self.collaborators.sink.on_state_change(UiState::Processing);

        let request = BatchRequest {
            job_id: job_id.clone(),
            job_type: self.job_type.clone(),
            batch_size,
            options: options.batch,
        };
        let response = match self.collaborators.executor.execute_batch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(job_type = %self.job_type, error = %e, "Failed to enqueue job");
                self.collaborators.sink.on_state_change(UiState::Idle);
                return Err(e.into());
            }
        };

        if response.credits_exhausted {
            warn!(job_type = %self.job_type, "Credits exhausted, nothing enqueued");
            self.collaborators.sink.on_state_change(UiState::Exhausted);
            return Ok(StartedJob::Exhausted);
        }

        self.reconciler
            .start_polling(job_id.clone(), self.config.poll_interval());
        Ok(StartedJob::Queued(job_id))
    }

    /// Stop the job of this type.
    ///
    /// A live client-stepped loop is stopped through the controller. Without
    /// one, the stop intent is still persisted and the server asked to drop
    /// queued work, using the polled job or the server's active job. Repeated
    /// calls have no further effect. The server request is not awaited.
    pub async fn stop(&self) -> Result<StopRequest, OrchestratorError> {
        self.stop_server_side().await.map(|(request, _)| request)
    }

    /// Like [`stop`](Self::stop), but wait for the server to answer the stop
    /// request when no local loop is live. For short-lived processes that
    /// exit right after stopping.
    pub async fn stop_and_wait(&self) -> Result<StopRequest, OrchestratorError> {
        let (request, remote) = self.stop_server_side().await?;
        if let Some(remote) = remote {
            remote
                .await
                .map_err(|e| OrchestratorError::JobAborted(e.to_string()))?;
        }
        Ok(request)
    }

    async fn stop_server_side(
        &self,
    ) -> Result<(StopRequest, Option<JoinHandle<()>>), OrchestratorError> {
        let request = self.controller.stop(&self.job_type);
        if request != StopRequest::NotLive {
            return Ok((request, None));
        }

        let job_id = match self.reconciler.polled_job() {
            Some(job_id) => job_id,
            None => {
                let active = self
                    .collaborators
                    .provider
                    .get_active_job(&self.job_type)
                    .await?;
                if !active.active {
                    debug!(job_type = %self.job_type, "Nothing to stop");
                    return Ok((StopRequest::NotLive, None));
                }
                active
                    .job_id
                    .unwrap_or_else(|| JobId::for_type(&self.job_type))
            }
        };

        let stop_intents = self.collaborators.stop_intents.as_ref();
        if intent_is_set(stop_intents, &self.job_type) {
            debug!(job_type = %self.job_type, job_id = %job_id, "Stop already requested");
            return Ok((StopRequest::AlreadyRequested(job_id), None));
        }

        info!(job_type = %self.job_type, job_id = %job_id, "Stop requested for server-side job");
        persist_intent(stop_intents, &self.job_type);
        self.collaborators.sink.on_state_change(UiState::Stopping);
        let remote = request_remote_stop(self.collaborators.executor.clone(), job_id.clone());
        Ok((StopRequest::Requested(job_id), Some(remote)))
    }
}

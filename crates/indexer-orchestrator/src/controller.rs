//! Client-stepped batch loop.
//!
//! The controller issues one executor call at a time, merges the server's
//! counts into the job's state and decides after every call whether to
//! continue, back off, or finish. Transient transport failures are absorbed
//! into the job's error log and retried for as long as work remains; only
//! credit exhaustion and an explicit stop end a job early without being
//! treated as a failure.
//!
//! When built [`with_status_reconciler`](JobController::with_status_reconciler)
//! the controller also polls server status beside each loop of that job
//! type, and ends the poller the moment the loop exits, before the terminal
//! state is emitted. Exhaustion therefore invalidates the poller at once
//! instead of waiting for a later tick to notice it.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexer_types::{
    BatchOptions, BatchRequest, FinalSummary, JobId, JobOutcome, JobType, OrchestratorConfig,
    RefreshReason, UiState,
};

use crate::collaborators::{BatchExecutor, ProgressSink};
use crate::error::OrchestratorError;
use crate::reconciler::StatusReconciler;
use crate::state::{JobControls, JobState, JobStateStore, StopRequest};
use crate::stop_intent::{clear_intent, persist_intent, StopIntentStore};

/// Parameters for a fresh job.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Overrides the configured batch size
    pub batch_size: Option<u32>,
    /// Item count, when the caller already knows it
    pub total: Option<u64>,
    pub batch: BatchOptions,
}

impl StartOptions {
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn only_tagged(mut self, tag: impl Into<String>) -> Self {
        self.batch = BatchOptions::only_tagged(tag);
        self
    }
}

/// Why the loop stopped issuing calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The executor reported `done`
    Finished,
    /// The executor reported exhausted credits
    Exhausted,
    /// The user asked to stop
    Stopped,
    /// A permanent failure, a transient one with nothing left to retry, or
    /// the configured failure cap reached
    Unrecoverable,
}

/// Classify a finished job.
///
/// Exhaustion wins over everything, an explicit stop over error counts.
/// Errors with items left over mean the job is incomplete.
pub fn classify(reason: ExitReason, state: &JobState) -> JobOutcome {
    match reason {
        _ if state.credits_exhausted() => JobOutcome::Exhausted,
        ExitReason::Exhausted => JobOutcome::Exhausted,
        ExitReason::Stopped => JobOutcome::Stopped,
        _ if state.errors().is_empty()
            && (reason == ExitReason::Finished || state.is_complete()) =>
        {
            JobOutcome::Completed
        }
        _ if state.is_complete() => JobOutcome::CompletedWithErrors,
        _ => JobOutcome::Incomplete,
    }
}

/// Handle to a running job loop.
#[derive(Debug)]
pub struct JobHandle {
    job_type: JobType,
    task: JoinHandle<FinalSummary>,
}

impl JobHandle {
    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end and return its summary.
    pub async fn wait(self) -> Result<FinalSummary, OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::JobAborted(e.to_string()))
    }
}

struct ControllerInner {
    executor: Arc<dyn BatchExecutor>,
    store: Arc<JobStateStore>,
    stop_intents: Arc<dyn StopIntentStore>,
    sink: Arc<dyn ProgressSink>,
    config: OrchestratorConfig,
    companion: Option<StatusReconciler>,
}

/// Drives client-stepped jobs against a batch executor.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<ControllerInner>,
}

impl JobController {
    pub fn new(
        executor: Arc<dyn BatchExecutor>,
        store: Arc<JobStateStore>,
        stop_intents: Arc<dyn StopIntentStore>,
        sink: Arc<dyn ProgressSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                executor,
                store,
                stop_intents,
                sink,
                config,
                companion: None,
            }),
        }
    }

    /// Poll server status beside every loop of the reconciler's job type.
    pub fn with_status_reconciler(self, reconciler: StatusReconciler) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(ControllerInner {
                executor: inner.executor.clone(),
                store: inner.store.clone(),
                stop_intents: inner.stop_intents.clone(),
                sink: inner.sink.clone(),
                config: inner.config.clone(),
                companion: Some(reconciler),
            }),
        }
    }

    pub fn store(&self) -> &Arc<JobStateStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Start a fresh job and spawn its loop.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::JobAlreadyLive` if a job of this type is
    /// live, and `OrchestratorError::InvalidConfig` for a zero batch size.
    /// Both are decided before anything is spawned.
    pub fn start(
        &self,
        job_type: JobType,
        options: StartOptions,
    ) -> Result<JobHandle, OrchestratorError> {
        let batch_size = options.batch_size.unwrap_or(self.inner.config.batch_size);
        if batch_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }

        let state = JobState::new(
            JobId::generate(),
            job_type.clone(),
            batch_size,
            options.batch,
            options.total,
        );
        let job_id = state.job_id().clone();
        let progress = state.progress();
        let controls = self.inner.store.insert(state)?;

        // a new job owns the stop flag from here on
        clear_intent(self.inner.stop_intents.as_ref(), &job_type);

        info!(
            job_type = %job_type,
            job_id = %job_id,
            batch_size = batch_size,
            total = ?options.total,
            "Starting indexing job"
        );
        self.inner.sink.on_state_change(UiState::Processing);
        self.inner.sink.on_progress(&progress);

        Ok(self.spawn_loop(job_type, job_id, controls))
    }

    /// Re-attach a loop to a job reconstructed from server state.
    ///
    /// The loop continues from the reconstructed counts instead of
    /// starting over.
    pub fn resume(&self, state: JobState) -> Result<JobHandle, OrchestratorError> {
        let job_type = state.job_type().clone();
        let job_id = state.job_id().clone();
        let progress = state.progress();
        info!(
            job_type = %job_type,
            job_id = %state.job_id(),
            processed = state.processed(),
            total = ?state.total(),
            "Resuming indexing job"
        );
        let controls = self.inner.store.insert(state)?;

        self.inner.sink.on_state_change(UiState::Processing);
        self.inner.sink.on_progress(&progress);

        Ok(self.spawn_loop(job_type, job_id, controls))
    }

    /// Ask a live job to stop.
    ///
    /// The loop notices at its next checkpoint; an executor call already in
    /// flight completes normally. Only the first call persists the intent and
    /// tells the server, so repeated calls have no further effect.
    pub fn stop(&self, job_type: &JobType) -> StopRequest {
        let request = self.inner.store.request_stop(job_type);
        match &request {
            StopRequest::Requested(job_id) => {
                info!(job_type = %job_type, job_id = %job_id, "Stop requested");
                persist_intent(self.inner.stop_intents.as_ref(), job_type);
                self.inner.sink.on_state_change(UiState::Stopping);
                // best-effort; the loop does not wait for the server
                let _ = request_remote_stop(self.inner.executor.clone(), job_id.clone());
            }
            StopRequest::AlreadyRequested(job_id) => {
                debug!(job_type = %job_type, job_id = %job_id, "Stop already requested");
            }
            StopRequest::NotLive => {
                debug!(job_type = %job_type, "Stop requested but no job loop is live");
            }
        }
        request
    }

    fn spawn_loop(&self, job_type: JobType, job_id: JobId, controls: JobControls) -> JobHandle {
        let companion = self
            .inner
            .companion
            .as_ref()
            .filter(|reconciler| *reconciler.job_type() == job_type)
            .cloned();
        if let Some(reconciler) = &companion {
            reconciler.follow_loop(
                job_id.clone(),
                self.inner.config.poll_interval(),
                self.inner.store.clone(),
            );
        }

        let controller = self.clone();
        let loop_type = job_type.clone();
        let task = tokio::spawn(async move {
            let reason = controller.drive(&loop_type, &controls).await;
            if let Some(reconciler) = companion {
                reconciler.release(&job_id);
            }
            controller.finish(&loop_type, reason).await
        });
        JobHandle { job_type, task }
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        let config = &self.inner.config;
        ExponentialBackoff {
            initial_interval: config.retry_backoff(),
            current_interval: config.retry_backoff(),
            max_interval: config.max_retry_backoff(),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn drive(&self, job_type: &JobType, controls: &JobControls) -> ExitReason {
        let config = &self.inner.config;
        let mut backoff = self.retry_backoff();
        let mut consecutive_failures: u32 = 0;

        loop {
            let Some(state) = self.inner.store.snapshot(job_type) else {
                error!(job_type = %job_type, "Job state disappeared while the loop was running");
                return ExitReason::Unrecoverable;
            };

            if state.stop_requested() {
                info!(
                    job_type = %job_type,
                    processed = state.processed(),
                    "Stop observed, no further batches will be issued"
                );
                return ExitReason::Stopped;
            }

            let Some(in_flight) = controls.in_flight.try_acquire() else {
                error!(job_type = %job_type, "A batch call is already in flight for this job");
                return ExitReason::Unrecoverable;
            };

            let request = BatchRequest {
                job_id: state.job_id().clone(),
                job_type: job_type.clone(),
                batch_size: state.batch_size(),
                options: state.options().clone(),
            };
            debug!(
                job_type = %job_type,
                processed = state.processed(),
                batch_size = request.batch_size,
                "Executing batch"
            );
            let result = self.inner.executor.execute_batch(&request).await;
            drop(in_flight);

            match result {
                Ok(response) => {
                    consecutive_failures = 0;
                    backoff.reset();

                    let Some(progress) = self.inner.store.update(job_type, |state| {
                        state.merge_counts(response.processed, response.remaining);
                        state.extend_errors(response.errors.iter().cloned());
                        if response.credits_exhausted {
                            state.mark_credits_exhausted();
                        }
                        state.progress()
                    }) else {
                        error!(job_type = %job_type, "Job state disappeared during a batch");
                        return ExitReason::Unrecoverable;
                    };

                    if !response.errors.is_empty() {
                        warn!(
                            job_type = %job_type,
                            failed = response.errors.len(),
                            "Batch completed with item failures"
                        );
                    }
                    debug!(
                        job_type = %job_type,
                        processed = progress.processed,
                        remaining = ?progress.remaining,
                        "Batch completed"
                    );
                    self.inner.sink.on_progress(&progress);

                    if response.credits_exhausted {
                        warn!(
                            job_type = %job_type,
                            remaining = response.remaining,
                            "Credits exhausted, ending job"
                        );
                        return ExitReason::Exhausted;
                    }
                    if response.done {
                        return ExitReason::Finished;
                    }

                    pause(config.step_delay(), &controls.cancel).await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let (work_left, exhausted) = self
                        .inner
                        .store
                        .update(job_type, |state| {
                            state.push_error(format!("Batch request failed: {e}"));
                            (state.has_remaining_work(), state.credits_exhausted())
                        })
                        .unwrap_or((false, false));

                    if !e.is_transient() {
                        error!(job_type = %job_type, error = %e, "Batch request failed permanently");
                        return ExitReason::Unrecoverable;
                    }
                    if exhausted || !work_left {
                        warn!(job_type = %job_type, error = %e, "Batch request failed with no work left");
                        return ExitReason::Unrecoverable;
                    }
                    let cap = config.max_consecutive_failures;
                    if cap > 0 && consecutive_failures >= cap {
                        error!(
                            job_type = %job_type,
                            failures = consecutive_failures,
                            "Too many consecutive batch failures, giving up"
                        );
                        return ExitReason::Unrecoverable;
                    }

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| config.max_retry_backoff());
                    warn!(
                        job_type = %job_type,
                        error = %e,
                        attempt = consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Batch request failed, retrying"
                    );
                    pause(delay, &controls.cancel).await;
                }
            }
        }
    }

    async fn finish(&self, job_type: &JobType, reason: ExitReason) -> FinalSummary {
        let summary = match self.inner.store.discard(job_type) {
            Some(state) => {
                let outcome = classify(reason, &state);
                FinalSummary {
                    job_type: job_type.clone(),
                    outcome,
                    processed: state.processed(),
                    total: state.total(),
                    elapsed_ms: state.elapsed_ms(Utc::now()),
                    errors: state.errors().to_vec(),
                }
            }
            None => FinalSummary {
                job_type: job_type.clone(),
                outcome: JobOutcome::Incomplete,
                processed: 0,
                total: None,
                elapsed_ms: 0,
                errors: vec!["Job state was lost before the job finished".to_string()],
            },
        };

        info!(
            job_type = %job_type,
            outcome = ?summary.outcome,
            processed = summary.processed,
            total = ?summary.total,
            errors = summary.errors.len(),
            elapsed_ms = summary.elapsed_ms,
            "Indexing job ended"
        );

        if reason == ExitReason::Stopped {
            // this loop was the only worker, so nothing is left to drain
            clear_intent(self.inner.stop_intents.as_ref(), job_type);
        }

        self.inner.sink.on_final_summary(&summary);
        self.inner.sink.on_state_change(summary.outcome.ui_state());

        tokio::time::sleep(self.inner.config.refresh_delay()).await;
        self.inner.sink.on_refresh(RefreshReason::JobFinished);

        summary
    }
}

/// Sleep, waking early if the job is asked to stop.
async fn pause(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {
            debug!("Delay cut short by stop request");
        }
    }
}

/// Ask the server to drop enqueued work without waiting for the answer.
///
/// Failures are only logged.
pub(crate) fn request_remote_stop(
    executor: Arc<dyn BatchExecutor>,
    job_id: JobId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match executor.request_stop(&job_id).await {
            Ok(()) => debug!(job_id = %job_id, "Server acknowledged stop"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Stop request to server failed"),
        }
    })
}

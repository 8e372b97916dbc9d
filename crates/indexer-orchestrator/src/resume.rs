//! Resume guard.
//!
//! On startup the client knows nothing; the server may still be running a
//! job a previous session started. The guard asks once, re-attaches to any
//! active job, and keeps new starts gated until that question is answered.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use indexer_types::{
    BatchOptions, ExecutionMode, JobId, JobType, OrchestratorConfig, ProgressUpdate, UiState,
};

use crate::collaborators::{ProgressSink, StatusProvider};
use crate::controller::{JobController, JobHandle};
use crate::error::OrchestratorError;
use crate::reconciler::StatusReconciler;
use crate::state::JobState;
use crate::stop_intent::{clear_intent, intent_is_set, StopIntentStore};

const NOT_CHECKED: u8 = 0;
const CHECKING: u8 = 1;
const READY: u8 = 2;

/// Where the start gate stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotChecked,
    Checking,
    Ready,
}

/// Start gate shared by the resume check and `start()`.
#[derive(Debug, Default)]
pub struct ResumeGate {
    state: AtomicU8,
}

impl ResumeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        match self.state.load(Ordering::SeqCst) {
            NOT_CHECKED => GateState::NotChecked,
            CHECKING => GateState::Checking,
            _ => GateState::Ready,
        }
    }

    /// Reject a start unless the resume check has completed.
    pub fn ensure_ready(&self) -> Result<(), OrchestratorError> {
        match self.state() {
            GateState::Ready => Ok(()),
            GateState::Checking => Err(OrchestratorError::ResumeCheckInProgress),
            GateState::NotChecked => Err(OrchestratorError::ResumeCheckPending),
        }
    }

    /// Close the gate for a check.
    ///
    /// The returned attempt reopens the gate to "not checked" when dropped
    /// without [`CheckAttempt::complete`].
    fn begin(&self) -> Result<CheckAttempt<'_>, OrchestratorError> {
        let current = self.state.load(Ordering::SeqCst);
        if current == CHECKING {
            return Err(OrchestratorError::ResumeCheckInProgress);
        }
        self.state
            .compare_exchange(current, CHECKING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| OrchestratorError::ResumeCheckInProgress)?;
        Ok(CheckAttempt {
            gate: self,
            completed: false,
        })
    }
}

struct CheckAttempt<'a> {
    gate: &'a ResumeGate,
    completed: bool,
}

impl CheckAttempt<'_> {
    fn complete(mut self) {
        self.completed = true;
        self.gate.state.store(READY, Ordering::SeqCst);
    }
}

impl Drop for CheckAttempt<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.gate.state.store(NOT_CHECKED, Ordering::SeqCst);
        }
    }
}

/// What the resume check found and did.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// No active job; the client starts idle
    Idle,
    /// A stopped job is still draining on the server; watching it finish
    Draining(JobId),
    /// The client-stepped loop was re-attached to a running job, with status
    /// polled beside it
    Resumed(JobHandle),
    /// A queue-mode job is running; watching it
    Polling(JobId),
    /// This process already drives the job
    AlreadyAttached,
}

/// Re-attaches to server-side jobs and gates new starts until it has.
pub struct ResumeGuard {
    job_type: JobType,
    mode: ExecutionMode,
    config: OrchestratorConfig,
    provider: Arc<dyn StatusProvider>,
    stop_intents: Arc<dyn StopIntentStore>,
    sink: Arc<dyn ProgressSink>,
    controller: JobController,
    reconciler: StatusReconciler,
    gate: ResumeGate,
}

impl ResumeGuard {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_type: JobType,
        mode: ExecutionMode,
        config: OrchestratorConfig,
        provider: Arc<dyn StatusProvider>,
        stop_intents: Arc<dyn StopIntentStore>,
        sink: Arc<dyn ProgressSink>,
        controller: JobController,
        reconciler: StatusReconciler,
    ) -> Self {
        Self {
            job_type,
            mode,
            config,
            provider,
            stop_intents,
            sink,
            controller,
            reconciler,
            gate: ResumeGate::new(),
        }
    }

    pub fn gate(&self) -> &ResumeGate {
        &self.gate
    }

    pub fn ensure_ready(&self) -> Result<(), OrchestratorError> {
        self.gate.ensure_ready()
    }

    /// Ask the server for an active job and re-attach to it.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::ResumeCheckInProgress` if another check is
    /// running. A failed status call is returned as
    /// `OrchestratorError::Collaborator` and leaves the gate "not checked" so
    /// the caller can retry.
    pub async fn check_and_resume(&self) -> Result<ResumeOutcome, OrchestratorError> {
        let attempt = self.gate.begin()?;
        let job_type = &self.job_type;
        debug!(job_type = %job_type, mode = ?self.mode, "Checking for an active job");

        let active = self.provider.get_active_job(job_type).await.map_err(|e| {
            warn!(job_type = %job_type, error = %e, "Resume check failed");
            e
        })?;

        let outcome = if !active.active {
            if intent_is_set(self.stop_intents.as_ref(), job_type) {
                info!(job_type = %job_type, "Clearing stale stop intent");
            }
            clear_intent(self.stop_intents.as_ref(), job_type);
            self.sink.on_state_change(UiState::Idle);
            ResumeOutcome::Idle
        } else {
            let job_id = active
                .job_id
                .clone()
                .unwrap_or_else(|| JobId::for_type(job_type));

            if intent_is_set(self.stop_intents.as_ref(), job_type) {
                info!(
                    job_type = %job_type,
                    job_id = %job_id,
                    "Active job was stopped earlier, waiting for it to drain"
                );
                self.sink.on_state_change(UiState::Stopping);
                self.reconciler
                    .start_polling(job_id.clone(), self.config.poll_interval());
                ResumeOutcome::Draining(job_id)
            } else {
                match self.mode {
                    ExecutionMode::ClientStepped => {
                        if self.controller.store().is_live(job_type) {
                            debug!(job_type = %job_type, "Job loop already attached");
                            ResumeOutcome::AlreadyAttached
                        } else {
                            let state = JobState::reconstruct(
                                job_type.clone(),
                                &active,
                                self.config.batch_size,
                                BatchOptions::default(),
                            );
                            ResumeOutcome::Resumed(self.controller.resume(state)?)
                        }
                    }
                    ExecutionMode::Queue => {
                        info!(job_type = %job_type, job_id = %job_id, "Re-attaching to queued job");
                        self.sink.on_state_change(UiState::Processing);
                        if let Some(total) = active.total {
                            let processed = active.processed.unwrap_or(0).min(total);
                            self.sink.on_progress(&ProgressUpdate {
                                processed,
                                total: Some(total),
                                remaining: active
                                    .remaining
                                    .or(Some(total.saturating_sub(processed))),
                                errors_count: 0,
                                credits_remaining: None,
                            });
                        }
                        self.reconciler
                            .start_polling(job_id.clone(), self.config.poll_interval());
                        ResumeOutcome::Polling(job_id)
                    }
                }
            }
        };

        attempt.complete();
        Ok(outcome)
    }
}

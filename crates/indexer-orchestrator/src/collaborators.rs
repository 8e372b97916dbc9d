//! Interfaces to the orchestrator's external collaborators.
//!
//! The batch executor and status provider are the indexing service; the
//! progress sink is whatever renders state for the user. None of them own
//! orchestration state.

use async_trait::async_trait;

use indexer_types::{
    ActiveJob, BatchRequest, BatchResponse, CollaboratorError, FinalSummary, JobId, JobType,
    ProgressUpdate, RefreshReason, StatusSnapshot, UiState,
};

/// Processes bounded slices of pending work.
///
/// Calls must be safe to repeat after a transient failure; the executor is
/// responsible for not double-counting items it already processed.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Process one slice (client-stepped mode) or enqueue the job (queue mode).
    async fn execute_batch(&self, request: &BatchRequest)
        -> Result<BatchResponse, CollaboratorError>;

    /// Ask the server to drop any enqueued remainder of a job.
    ///
    /// Best-effort; the orchestrator never waits on the outcome.
    async fn request_stop(&self, job_id: &JobId) -> Result<(), CollaboratorError>;
}

/// Reports server-side job progress. All calls are side-effect free.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, CollaboratorError>;

    async fn get_active_job(&self, job_type: &JobType) -> Result<ActiveJob, CollaboratorError>;
}

/// Presentation layer fed by the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);

    fn on_state_change(&self, state: UiState);

    fn on_final_summary(&self, summary: &FinalSummary);

    /// Reload every aggregate display, not only the job widget.
    fn on_refresh(&self, reason: RefreshReason);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _update: &ProgressUpdate) {}

    fn on_state_change(&self, _state: UiState) {}

    fn on_final_summary(&self, _summary: &FinalSummary) {}

    fn on_refresh(&self, _reason: RefreshReason) {}
}

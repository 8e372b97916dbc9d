//! Scripted collaborators for testing.
//!
//! Useful for driving the orchestrator without an indexing service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use indexer_types::{
    ActiveJob, BatchRequest, BatchResponse, CollaboratorError, FinalSummary, JobId, JobType,
    ProgressUpdate, RefreshReason, StatusSnapshot, UiState,
};

use crate::collaborators::{BatchExecutor, ProgressSink, StatusProvider};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executor that replays a script of batch results.
///
/// Once the script runs out every call is rejected with a permanent error,
/// so a test that under-scripts fails fast instead of looping.
#[derive(Default)]
pub struct MockExecutor {
    script: Mutex<VecDeque<Result<BatchResponse, CollaboratorError>>>,
    requests: Mutex<Vec<BatchRequest>>,
    stop_requests: Mutex<Vec<JobId>>,
    stop_error: Mutex<Option<CollaboratorError>>,
    latency: Option<Duration>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(
        responses: impl IntoIterator<Item = Result<BatchResponse, CollaboratorError>>,
    ) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Make every batch call take `latency` of (virtual) time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_response(&self, response: BatchResponse) {
        lock(&self.script).push_back(Ok(response));
    }

    pub fn push_error(&self, error: CollaboratorError) {
        lock(&self.script).push_back(Err(error));
    }

    /// Make `request_stop` fail.
    pub fn fail_stop_requests(&self, error: CollaboratorError) {
        *lock(&self.stop_error) = Some(error);
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<BatchRequest> {
        lock(&self.requests).clone()
    }

    pub fn stop_requests(&self) -> Vec<JobId> {
        lock(&self.stop_requests).clone()
    }

    /// Highest number of batch calls ever outstanding at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchExecutor for MockExecutor {
    async fn execute_batch(
        &self,
        request: &BatchRequest,
    ) -> Result<BatchResponse, CollaboratorError> {
        lock(&self.requests).push(request.clone());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = lock(&self.script).pop_front();
        self.current.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| {
            Err(CollaboratorError::Rejected {
                status: 410,
                message: "no scripted batch response".to_string(),
            })
        })
    }

    async fn request_stop(&self, job_id: &JobId) -> Result<(), CollaboratorError> {
        lock(&self.stop_requests).push(job_id.clone());
        match lock(&self.stop_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Status provider replaying scripted snapshots.
///
/// The last snapshot repeats once the script is down to one entry; an
/// empty script reports an idle, empty job.
pub struct MockStatusProvider {
    snapshots: Mutex<VecDeque<StatusSnapshot>>,
    failures: Mutex<VecDeque<CollaboratorError>>,
    active_job: Mutex<Result<ActiveJob, CollaboratorError>>,
    polled: Mutex<Vec<JobId>>,
    latency: Option<Duration>,
}

impl Default for MockStatusProvider {
    fn default() -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            active_job: Mutex::new(Ok(ActiveJob::inactive())),
            polled: Mutex::new(Vec::new()),
            latency: None,
        }
    }
}

impl MockStatusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(snapshots: impl IntoIterator<Item = StatusSnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Make every status and active-job call take `latency` of (virtual) time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_snapshot(&self, snapshot: StatusSnapshot) {
        lock(&self.snapshots).push_back(snapshot);
    }

    /// Fail the next status call; queued failures are used before snapshots.
    pub fn fail_next(&self, error: CollaboratorError) {
        lock(&self.failures).push_back(error);
    }

    pub fn set_active_job(&self, active: ActiveJob) {
        *lock(&self.active_job) = Ok(active);
    }

    pub fn fail_active_job(&self, error: CollaboratorError) {
        *lock(&self.active_job) = Err(error);
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.polled).len()
    }

    /// Job ids passed to `get_status`, deduplicated in call order.
    pub fn polled_jobs(&self) -> Vec<JobId> {
        let mut seen: Vec<JobId> = Vec::new();
        for job_id in lock(&self.polled).iter() {
            if !seen.contains(job_id) {
                seen.push(job_id.clone());
            }
        }
        seen
    }
}

#[async_trait]
impl StatusProvider for MockStatusProvider {
    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, CollaboratorError> {
        lock(&self.polled).push(job_id.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }

        let mut snapshots = lock(&self.snapshots);
        let snapshot = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        Ok(snapshot.unwrap_or_else(|| StatusSnapshot::idle(0, 0)))
    }

    async fn get_active_job(&self, _job_type: &JobType) -> Result<ActiveJob, CollaboratorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        lock(&self.active_job).clone()
    }
}

/// One event delivered to a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Progress(ProgressUpdate),
    State(UiState),
    Summary(FinalSummary),
    Refresh(RefreshReason),
}

/// Sink that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        lock(&self.events).clone()
    }

    pub fn states(&self) -> Vec<UiState> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn last_state(&self) -> Option<UiState> {
        self.states().last().copied()
    }

    pub fn progress_updates(&self) -> Vec<ProgressUpdate> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<FinalSummary> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Summary(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn refreshes(&self) -> Vec<RefreshReason> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Refresh(reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, update: &ProgressUpdate) {
        lock(&self.events).push(SinkEvent::Progress(update.clone()));
    }

    fn on_state_change(&self, state: UiState) {
        lock(&self.events).push(SinkEvent::State(state));
    }

    fn on_final_summary(&self, summary: &FinalSummary) {
        lock(&self.events).push(SinkEvent::Summary(summary.clone()));
    }

    fn on_refresh(&self, reason: RefreshReason) {
        lock(&self.events).push(SinkEvent::Refresh(reason));
    }
}

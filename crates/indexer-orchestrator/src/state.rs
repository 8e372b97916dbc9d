//! Job state and the store that owns it.
//!
//! The `JobStateStore` holds at most one live `JobState` per job type. It is
//! an injectable object rather than module state so several job types (or
//! several test instances) never share flags by accident.
//!
//! Write access is split: the job controller updates counts and errors, the
//! stop operation sets the stop flag, and everyone else only gets snapshots.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use indexer_types::{ActiveJob, BatchOptions, JobId, JobType, ProgressUpdate};

use crate::error::OrchestratorError;
use crate::in_flight::InFlightGuard;

/// Error message recorded when the executor reports exhausted credits.
pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits: indexing stopped";

/// The orchestrator's view of one in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobState {
    job_id: JobId,
    job_type: JobType,
    options: BatchOptions,
    batch_size: u32,
    total: Option<u64>,
    processed: u64,
    remaining: Option<u64>,
    errors: Vec<String>,
    started_at: DateTime<Utc>,
    stop_requested: bool,
    credits_exhausted: bool,
}

impl JobState {
    /// State for a freshly started job.
    ///
    /// When `total` is `None` it is learned from the first batch response.
    pub fn new(
        job_id: JobId,
        job_type: JobType,
        batch_size: u32,
        options: BatchOptions,
        total: Option<u64>,
    ) -> Self {
        Self {
            job_id,
            job_type,
            options,
            batch_size,
            total,
            processed: 0,
            remaining: total,
            errors: Vec::new(),
            started_at: Utc::now(),
            stop_requested: false,
            credits_exhausted: false,
        }
    }

    /// Rebuild state for a job the server reports as already active.
    pub fn reconstruct(
        job_type: JobType,
        active: &ActiveJob,
        batch_size: u32,
        options: BatchOptions,
    ) -> Self {
        let job_id = active
            .job_id
            .clone()
            .unwrap_or_else(|| JobId::for_type(&job_type));
        let total = active.total;
        let processed = match (active.processed, total) {
            (Some(processed), Some(total)) => processed.min(total),
            (Some(processed), None) => processed,
            (None, _) => 0,
        };
        let remaining = active
            .remaining
            .or_else(|| total.map(|t| t.saturating_sub(processed)));

        Self {
            job_id,
            job_type,
            options,
            batch_size,
            total,
            processed,
            remaining,
            errors: Vec::new(),
            started_at: active.started_at.unwrap_or_else(Utc::now),
            stop_requested: false,
            credits_exhausted: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn credits_exhausted(&self) -> bool {
        self.credits_exhausted
    }

    /// True while the server may still have work for this job.
    ///
    /// An unknown remainder counts as work left.
    pub fn has_remaining_work(&self) -> bool {
        self.remaining.map_or(true, |r| r > 0)
    }

    /// Whether every known item has been processed.
    pub fn is_complete(&self) -> bool {
        self.total.map_or(true, |total| self.processed >= total)
    }

    /// Merge server-reported job-wide counts.
    ///
    /// Server counts overwrite local ones, except that `processed` never
    /// decreases and never exceeds a known total.
    pub fn merge_counts(&mut self, processed: u64, remaining: u64) {
        let total = *self
            .total
            .get_or_insert_with(|| processed.saturating_add(remaining));

        let reported = processed.min(total);
        if reported < self.processed {
            warn!(
                job_type = %self.job_type,
                reported = reported,
                current = self.processed,
                "Server reported fewer processed items than before, keeping current count"
            );
        }
        self.processed = self.processed.max(reported);
        self.remaining = Some(remaining);

        if self.processed.saturating_add(remaining) != total {
            debug!(
                job_type = %self.job_type,
                processed = self.processed,
                remaining = remaining,
                total = total,
                "Server counts do not add up to total"
            );
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend_errors(&mut self, messages: impl IntoIterator<Item = String>) {
        self.errors.extend(messages);
    }

    /// Set the stop flag. Returns `true` only on the first call.
    pub fn request_stop(&mut self) -> bool {
        !std::mem::replace(&mut self.stop_requested, true)
    }

    /// Record credit exhaustion with a single synthetic error entry.
    pub fn mark_credits_exhausted(&mut self) {
        if !self.credits_exhausted {
            self.credits_exhausted = true;
            self.errors.push(INSUFFICIENT_CREDITS.to_string());
        }
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            processed: self.processed,
            total: self.total,
            remaining: self.remaining,
            errors_count: self.errors.len(),
            credits_remaining: None,
        }
    }
}

/// Per-job handles that live next to the state but are not part of it.
#[derive(Debug, Clone)]
pub struct JobControls {
    /// Cancelled by `stop()` to cut short the loop's delays
    pub cancel: CancellationToken,
    pub in_flight: InFlightGuard,
}

impl JobControls {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            in_flight: InFlightGuard::new(),
        }
    }
}

/// Result of asking a live job to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopRequest {
    /// The flag was just set
    Requested(JobId),
    /// The flag was already set by an earlier call
    AlreadyRequested(JobId),
    /// No job of this type is live
    NotLive,
}

struct LiveJob {
    state: JobState,
    controls: JobControls,
}

/// Owner of every live `JobState`, keyed by job type.
///
/// # Example
///
/// ```
/// use indexer_orchestrator::{JobState, JobStateStore};
/// use indexer_types::{BatchOptions, JobId, JobType};
///
/// let store = JobStateStore::new();
/// let job_type = JobType::new("topics");
/// let state = JobState::new(JobId::generate(), job_type.clone(), 50, BatchOptions::default(), Some(10));
///
/// store.insert(state).unwrap();
/// assert!(store.is_live(&job_type));
///
/// let frozen = store.discard(&job_type).unwrap();
/// assert_eq!(frozen.total(), Some(10));
/// assert!(!store.is_live(&job_type));
/// ```
#[derive(Default)]
pub struct JobStateStore {
    jobs: RwLock<HashMap<JobType, LiveJob>>,
}

impl JobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobType, LiveJob>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobType, LiveJob>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a job live.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::JobAlreadyLive` if a job of the same type
    /// is already live; the existing job is left untouched.
    pub fn insert(&self, state: JobState) -> Result<JobControls, OrchestratorError> {
        let mut jobs = self.write();
        if jobs.contains_key(state.job_type()) {
            return Err(OrchestratorError::JobAlreadyLive(state.job_type().clone()));
        }
        let controls = JobControls::new();
        jobs.insert(
            state.job_type().clone(),
            LiveJob {
                state,
                controls: controls.clone(),
            },
        );
        Ok(controls)
    }

    pub fn is_live(&self, job_type: &JobType) -> bool {
        self.read().contains_key(job_type)
    }

    /// Read-only copy of a live job's state.
    pub fn snapshot(&self, job_type: &JobType) -> Option<JobState> {
        self.read().get(job_type).map(|job| job.state.clone())
    }

    pub fn controls(&self, job_type: &JobType) -> Option<JobControls> {
        self.read().get(job_type).map(|job| job.controls.clone())
    }

    /// Mutate a live job's counts and errors. Reserved for the job controller.
    pub(crate) fn update<R>(
        &self,
        job_type: &JobType,
        f: impl FnOnce(&mut JobState) -> R,
    ) -> Option<R> {
        self.write().get_mut(job_type).map(|job| f(&mut job.state))
    }

    /// Set the stop flag and wake the job's loop if it is sleeping.
    pub fn request_stop(&self, job_type: &JobType) -> StopRequest {
        let mut jobs = self.write();
        match jobs.get_mut(job_type) {
            Some(job) => {
                let job_id = job.state.job_id().clone();
                if job.state.request_stop() {
                    job.controls.cancel.cancel();
                    StopRequest::Requested(job_id)
                } else {
                    StopRequest::AlreadyRequested(job_id)
                }
            }
            None => StopRequest::NotLive,
        }
    }

    /// Remove a job, returning its final state.
    pub fn discard(&self, job_type: &JobType) -> Option<JobState> {
        self.write().remove(job_type).map(|job| job.state)
    }

    pub fn live_count(&self) -> usize {
        self.read().len()
    }
}

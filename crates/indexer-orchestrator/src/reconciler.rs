//! Status reconciler.
//!
//! Polls the status provider and merges its two activity signals. A queue
//! worker invoked on a fixed cadence briefly reports "not active" between
//! invocations while items are still queued, so the job only counts as idle
//! once both the worker flag and the queue flag are false.
//!
//! The merge itself lives in [`ReconcilerCore`], a plain state machine with
//! no I/O. [`StatusReconciler`] wraps it in a polling session.
//!
//! A session either watches a server-side job (queue mode, or a stopped job
//! draining after a restart) and owns its idle transition, or runs beside a
//! live client-stepped loop. Beside a loop it only reads the job state and
//! forwards the server's credit count; the loop owns every state change and
//! ends the session when it finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use indexer_types::{
    JobId, JobType, OrchestratorConfig, ProgressUpdate, RefreshReason, StatusSnapshot, UiState,
};

use crate::collaborators::{ProgressSink, StatusProvider};
use crate::state::JobStateStore;
use crate::stop_intent::{clear_intent, intent_is_set, StopIntentStore};

/// Merged view of one status snapshot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciledStatus {
    pub worker_active: bool,
    pub queue_non_empty: bool,
    pub effective_active: bool,
    pub previous_effective_active: bool,
}

impl ReconciledStatus {
    /// Active on the previous tick, idle on this one.
    pub fn is_falling_edge(&self) -> bool {
        self.previous_effective_active && !self.effective_active
    }
}

/// What the polling session should do after one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub status: ReconciledStatus,
    pub state: UiState,
    /// Counters to display; only present while the job is active
    pub progress: Option<ProgressUpdate>,
    pub keep_polling: bool,
    /// Fire one refresh after the configured delay
    pub refresh: bool,
    pub clear_stop_intent: bool,
}

/// Per-session merge state.
#[derive(Debug, Default, Clone)]
pub struct ReconcilerCore {
    previous_effective_active: bool,
}

impl ReconcilerCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_effective_active(&self) -> bool {
        self.previous_effective_active
    }

    /// Fold one snapshot into the session.
    pub fn tick(&mut self, snapshot: &StatusSnapshot, stop_intent: bool) -> TickOutcome {
        let effective_active = snapshot.worker_active || snapshot.queue_non_empty;
        let status = ReconciledStatus {
            worker_active: snapshot.worker_active,
            queue_non_empty: snapshot.queue_non_empty,
            effective_active,
            previous_effective_active: self.previous_effective_active,
        };
        self.previous_effective_active = effective_active;

        if effective_active {
            let processed = if snapshot.total > 0 {
                snapshot.processed.min(snapshot.total)
            } else {
                snapshot.processed
            };
            TickOutcome {
                status,
                state: if stop_intent {
                    UiState::Stopping
                } else {
                    UiState::Processing
                },
                progress: Some(ProgressUpdate {
                    processed,
                    total: Some(snapshot.total),
                    remaining: Some(snapshot.total.saturating_sub(processed)),
                    errors_count: 0,
                    credits_remaining: snapshot.credits_remaining,
                }),
                keep_polling: true,
                refresh: false,
                clear_stop_intent: false,
            }
        } else {
            TickOutcome {
                status,
                state: UiState::Idle,
                progress: None,
                keep_polling: false,
                refresh: status.is_falling_edge(),
                clear_stop_intent: true,
            }
        }
    }
}

/// Deadline used when the configured cutoff does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What a polling session is for.
enum SessionRole {
    /// Follows a server-side job until it goes idle
    Watch,
    /// Runs beside a live client-stepped loop, reading its state
    Companion(Arc<JobStateStore>),
}

impl SessionRole {
    fn is_companion(&self) -> bool {
        matches!(self, SessionRole::Companion(_))
    }
}

struct PollSession {
    generation: u64,
    job_id: JobId,
    companion: bool,
    cancel: CancellationToken,
}

struct ReconcilerInner {
    job_type: JobType,
    provider: Arc<dyn StatusProvider>,
    stop_intents: Arc<dyn StopIntentStore>,
    sink: Arc<dyn ProgressSink>,
    config: OrchestratorConfig,
    session: Mutex<Option<PollSession>>,
    generation: AtomicU64,
    /// Highest generation whose task has fully wound down
    finished: watch::Sender<u64>,
}

impl ReconcilerInner {
    fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Close the session if it is still the given generation.
    fn end_session(&self, generation: u64) -> bool {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            *session = None;
            true
        } else {
            false
        }
    }

    fn mark_finished(&self, generation: u64) {
        self.finished.send_modify(|f| *f = (*f).max(generation));
    }
}

/// Polls server status for one job type.
///
/// At most one polling session runs per reconciler; starting while a
/// session is live and stopping while none is are both no-ops.
#[derive(Clone)]
pub struct StatusReconciler {
    inner: Arc<ReconcilerInner>,
}

impl StatusReconciler {
    pub fn new(
        job_type: JobType,
        provider: Arc<dyn StatusProvider>,
        stop_intents: Arc<dyn StopIntentStore>,
        sink: Arc<dyn ProgressSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            inner: Arc::new(ReconcilerInner {
                job_type,
                provider,
                stop_intents,
                sink,
                config,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                finished,
            }),
        }
    }

    pub fn job_type(&self) -> &JobType {
        &self.inner.job_type
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Job being polled, if any.
    pub fn polled_job(&self) -> Option<JobId> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.job_id.clone())
    }

    /// Begin polling `job_id` every `interval`.
    ///
    /// Returns `false` without doing anything if a session is already live.
    pub fn start_polling(&self, job_id: JobId, interval: Duration) -> bool {
        self.begin(job_id, interval, SessionRole::Watch)
    }

    /// Poll `job_id` beside its client-stepped loop.
    ///
    /// The session never emits a state change, never clears the stop intent
    /// and never ends on an idle tick. While the server reports activity it
    /// re-emits the loop's counters from `store` with the server's credit
    /// count. The loop ends it with [`release`](Self::release).
    pub fn follow_loop(
        &self,
        job_id: JobId,
        interval: Duration,
        store: Arc<JobStateStore>,
    ) -> bool {
        self.begin(job_id, interval, SessionRole::Companion(store))
    }

    /// End the session beside the loop for `job_id`, if it is the live one.
    ///
    /// A status response still in flight is discarded.
    pub fn release(&self, job_id: &JobId) -> bool {
        let mut session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !session
            .as_ref()
            .is_some_and(|s| s.companion && s.job_id == *job_id)
        {
            return false;
        }
        if let Some(session) = session.take() {
            debug!(
                job_type = %self.inner.job_type,
                job_id = %session.job_id,
                "Job loop ended, releasing status polling"
            );
            session.cancel.cancel();
        }
        true
    }

    fn begin(&self, job_id: JobId, interval: Duration, role: SessionRole) -> bool {
        let mut session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = session.as_ref() {
            debug!(
                job_type = %self.inner.job_type,
                job_id = %existing.job_id,
                "Polling already running"
            );
            return false;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *session = Some(PollSession {
            generation,
            job_id: job_id.clone(),
            companion: role.is_companion(),
            cancel: cancel.clone(),
        });
        drop(session);

        info!(
            job_type = %self.inner.job_type,
            job_id = %job_id,
            interval_ms = interval.as_millis() as u64,
            generation = generation,
            beside_loop = role.is_companion(),
            "Starting status polling"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            poll(&inner, generation, job_id, interval, role, cancel).await;
            inner.mark_finished(generation);
        });
        true
    }

    /// Cancel the live session. Responses still in flight are discarded.
    pub fn stop_polling(&self) -> bool {
        let session = self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match session {
            Some(session) => {
                info!(
                    job_type = %self.inner.job_type,
                    job_id = %session.job_id,
                    "Stopping status polling"
                );
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until the most recent session has wound down, including any
    /// trailing refresh it scheduled.
    pub async fn wait_until_stopped(&self) {
        let target = self.inner.generation.load(Ordering::SeqCst);
        if target == 0 {
            return;
        }
        let mut rx = self.inner.finished.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|finished| *finished >= target).await;
    }
}

async fn poll(
    inner: &ReconcilerInner,
    generation: u64,
    job_id: JobId,
    interval: Duration,
    role: SessionRole,
    cancel: CancellationToken,
) {
    let job_type = &inner.job_type;
    let now = Instant::now();
    let deadline = now
        .checked_add(inner.config.poll_cutoff())
        .unwrap_or(now + FAR_FUTURE);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut core = ReconcilerCore::new();
    let mut last_state: Option<UiState> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                cutoff(inner, generation, &role).await;
                return;
            }
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                cutoff(inner, generation, &role).await;
                return;
            }
            result = inner.provider.get_status(&job_id) => result,
        };

        if !inner.is_current(generation) {
            debug!(job_type = %job_type, generation = generation, "Discarding stale status response");
            return;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job_type = %job_type, job_id = %job_id, error = %e, "Status poll failed");
                continue;
            }
        };

        if let SessionRole::Companion(store) = &role {
            let state = store
                .snapshot(job_type)
                .filter(|state| *state.job_id() == job_id);
            let Some(state) = state else {
                inner.end_session(generation);
                debug!(job_type = %job_type, job_id = %job_id, "Job loop gone, polling stopped");
                return;
            };
            let status = core.tick(&snapshot, false).status;
            debug!(
                job_type = %job_type,
                worker_active = status.worker_active,
                queue_non_empty = status.queue_non_empty,
                processed = state.processed(),
                credits_remaining = ?snapshot.credits_remaining,
                "Status tick beside job loop"
            );
            if status.effective_active {
                inner.sink.on_progress(&ProgressUpdate {
                    credits_remaining: snapshot.credits_remaining,
                    ..state.progress()
                });
            }
            continue;
        }

        let stop_intent = intent_is_set(inner.stop_intents.as_ref(), job_type);
        let outcome = core.tick(&snapshot, stop_intent);
        debug!(
            job_type = %job_type,
            worker_active = outcome.status.worker_active,
            queue_non_empty = outcome.status.queue_non_empty,
            processed = snapshot.processed,
            total = snapshot.total,
            "Status tick"
        );

        if let Some(progress) = &outcome.progress {
            inner.sink.on_progress(progress);
        }
        if last_state != Some(outcome.state) {
            inner.sink.on_state_change(outcome.state);
            last_state = Some(outcome.state);
        }
        if outcome.clear_stop_intent {
            clear_intent(inner.stop_intents.as_ref(), job_type);
        }

        if !outcome.keep_polling {
            inner.end_session(generation);
            info!(
                job_type = %job_type,
                job_id = %job_id,
                processed = snapshot.processed,
                "Job idle, polling stopped"
            );
            if outcome.refresh {
                tokio::time::sleep(inner.config.refresh_delay()).await;
                inner.sink.on_refresh(RefreshReason::QueueDrained);
            }
            return;
        }
    }
}

async fn cutoff(inner: &ReconcilerInner, generation: u64, role: &SessionRole) {
    if !inner.end_session(generation) {
        return;
    }
    if role.is_companion() {
        // the loop refreshes when it finishes
        debug!(job_type = %inner.job_type, "Polling cutoff reached beside job loop");
        return;
    }
    warn!(
        job_type = %inner.job_type,
        cutoff_secs = inner.config.poll_cutoff_secs,
        "Polling cutoff reached, forcing refresh"
    );
    tokio::time::sleep(inner.config.refresh_delay()).await;
    inner.sink.on_refresh(RefreshReason::PollCutoff);
}

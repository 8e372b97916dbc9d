//! End-to-end tests for queue-mode jobs and status polling.
//!
//! Queue-mode jobs are enqueued with one kick-off call; after that the
//! status reconciler follows the server until it reports idle.

use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use indexer_orchestrator::mock::{MockExecutor, MockStatusProvider};
use indexer_orchestrator::{OrchestratorError, StartOptions, StartedJob};
use indexer_types::{
    BatchResponse, CollaboratorError, ExecutionMode, OrchestratorConfig, RefreshReason,
    StatusSnapshot, UiState,
};

fn queued_only(processed: u64, total: u64) -> StatusSnapshot {
    StatusSnapshot {
        worker_active: false,
        queue_non_empty: true,
        processed,
        total,
        credits_remaining: None,
    }
}

fn queue_harness(snapshots: impl IntoIterator<Item = StatusSnapshot>) -> TestHarness {
    TestHarness::with_collaborators(
        MockExecutor::with_responses([Ok(BatchResponse::new(0, 20, false))]),
        MockStatusProvider::with_snapshots(snapshots),
    )
}

// ---------------------------------------------------------------------------
// Drain to idle
// ---------------------------------------------------------------------------

/// Work waiting between workers keeps the job active until the queue is
/// empty, then exactly one refresh follows.
#[tokio::test(start_paused = true)]
async fn test_queue_job_polled_until_idle() {
    let harness = queue_harness([
        StatusSnapshot::active(5, 20),
        queued_only(10, 20),
        StatusSnapshot::active(15, 20),
        StatusSnapshot::idle(20, 20),
    ]);
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    let started = orchestrator.start(StartOptions::default()).await.unwrap();
    let StartedJob::Queued(job_id) = started else {
        panic!("expected a queued job, got {started:?}");
    };
    assert!(orchestrator.is_busy());

    orchestrator.reconciler().wait_until_stopped().await;

    assert_eq!(harness.provider.status_calls(), 4);
    assert_eq!(harness.provider.polled_jobs(), vec![job_id]);
    assert_eq!(harness.executor.calls(), 1);

    let processed: Vec<u64> = harness
        .sink
        .progress_updates()
        .iter()
        .map(|p| p.processed)
        .collect();
    assert_eq!(processed, vec![5, 10, 15]);

    // idle only at the start and once the queue drained
    let states = harness.sink.states();
    assert_eq!(states.first(), Some(&UiState::Idle));
    assert_eq!(states.last(), Some(&UiState::Idle));
    assert_eq!(states.iter().filter(|s| **s == UiState::Idle).count(), 2);

    assert_eq!(harness.sink.refreshes(), vec![RefreshReason::QueueDrained]);
    assert!(!orchestrator.is_busy());
}

/// Server counts above the total are clamped before they are shown.
#[tokio::test(start_paused = true)]
async fn test_polled_counts_clamped_to_total() {
    let harness = queue_harness([
        StatusSnapshot::active(25, 20),
        StatusSnapshot::idle(25, 20),
    ]);
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    orchestrator.start(StartOptions::default()).await.unwrap();
    orchestrator.reconciler().wait_until_stopped().await;

    let progress = harness.sink.progress_updates();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].processed, 20);
    assert_eq!(progress[0].remaining, Some(0));
}

/// A failed status call is skipped and polling carries on.
#[tokio::test(start_paused = true)]
async fn test_poll_failures_are_tolerated() {
    let harness = queue_harness([
        StatusSnapshot::active(5, 20),
        StatusSnapshot::idle(20, 20),
    ]);
    harness.provider.fail_next(CollaboratorError::Timeout);
    harness
        .provider
        .fail_next(CollaboratorError::Transport("connection reset".to_string()));
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    orchestrator.start(StartOptions::default()).await.unwrap();
    orchestrator.reconciler().wait_until_stopped().await;

    assert_eq!(harness.provider.status_calls(), 4);
    assert_eq!(harness.sink.last_state(), Some(UiState::Idle));
    assert_eq!(harness.sink.refreshes(), vec![RefreshReason::QueueDrained]);
}

/// Polling gives up after the cutoff and forces a refresh.
#[tokio::test(start_paused = true)]
async fn test_poll_cutoff_forces_refresh() {
    let harness = queue_harness([StatusSnapshot::active(5, 20)]);
    let config = harness.config.clone();
    let harness = harness.with_config(OrchestratorConfig {
        poll_cutoff_secs: 30,
        ..config
    });
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    orchestrator.start(StartOptions::default()).await.unwrap();
    orchestrator.reconciler().wait_until_stopped().await;

    assert!(!orchestrator.reconciler().is_polling());
    assert_eq!(harness.sink.refreshes(), vec![RefreshReason::PollCutoff]);
    // one poll per second up to the cutoff
    let calls = harness.provider.status_calls();
    assert!((29..=31).contains(&calls), "unexpected poll count {calls}");
}

// ---------------------------------------------------------------------------
// Kick-off
// ---------------------------------------------------------------------------

/// A kick-off refused for lack of credits starts no polling.
#[tokio::test(start_paused = true)]
async fn test_queue_start_without_credits() {
    let harness = TestHarness::with_collaborators(
        MockExecutor::with_responses([Ok(
            BatchResponse::new(0, 20, false).with_credits_exhausted()
        )]),
        MockStatusProvider::new(),
    );
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    let started = orchestrator.start(StartOptions::default()).await.unwrap();

    assert!(matches!(started, StartedJob::Exhausted));
    assert!(!orchestrator.is_busy());
    assert_eq!(harness.sink.last_state(), Some(UiState::Exhausted));
    assert_eq!(harness.provider.status_calls(), 0);
}

/// A second start while the first job is being polled is refused.
#[tokio::test(start_paused = true)]
async fn test_queue_start_refused_while_polling() {
    let harness = queue_harness([
        StatusSnapshot::active(5, 20),
        StatusSnapshot::idle(20, 20),
    ]);
    let orchestrator = harness.ready_orchestrator(ExecutionMode::Queue).await;

    orchestrator.start(StartOptions::default()).await.unwrap();
    let err = orchestrator
        .start(StartOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::JobAlreadyLive(_)));
    assert_eq!(harness.executor.calls(), 1);

    orchestrator.reconciler().wait_until_stopped().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // once drained, the job type is free again
    harness
        .executor
        .push_response(BatchResponse::new(0, 5, false));
    let started = orchestrator.start(StartOptions::default()).await.unwrap();
    assert!(matches!(started, StartedJob::Queued(_)));
    assert_eq!(harness.executor.calls(), 2);
}

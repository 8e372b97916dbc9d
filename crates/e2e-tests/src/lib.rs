//! End-to-end test infrastructure for the indexing orchestrator.
//!
//! Provides a shared TestHarness that wires scripted collaborators and a
//! file-backed stop intent store into an `IndexingOrchestrator`, so tests
//! can drive whole jobs and simulate process restarts.

use std::path::PathBuf;
use std::sync::Arc;

use indexer_orchestrator::mock::{MockExecutor, MockStatusProvider, RecordingSink};
use indexer_orchestrator::{
    Collaborators, FileStopIntentStore, IndexingOrchestrator, JobHandle, StartedJob,
    StopIntentStore,
};
use indexer_types::{ExecutionMode, JobType, OrchestratorConfig};

/// Job type used by every scenario.
pub const JOB_TYPE: &str = "topics";

/// Shared test harness for E2E tests.
///
/// Collaborators live on the harness rather than the orchestrator, so a
/// second orchestrator built from the same harness sees the same server
/// and the same stop intent file, like a reloaded process would.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Scripted batch executor
    pub executor: Arc<MockExecutor>,
    /// Scripted status provider
    pub provider: Arc<MockStatusProvider>,
    /// Records everything shown to the user
    pub sink: Arc<RecordingSink>,
    /// Location of the persisted stop intents
    pub intent_path: PathBuf,
    /// Config used for orchestrators built by this harness
    pub config: OrchestratorConfig,
}

impl TestHarness {
    /// Create a harness with fresh mocks and short delays.
    pub fn new() -> Self {
        Self::with_collaborators(MockExecutor::new(), MockStatusProvider::new())
    }

    /// Create a harness around pre-scripted mocks.
    pub fn with_collaborators(executor: MockExecutor, provider: MockStatusProvider) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let intent_path = temp_dir.path().join("stop-intents.json");

        Self {
            _temp_dir: temp_dir,
            executor: Arc::new(executor),
            provider: Arc::new(provider),
            sink: Arc::new(RecordingSink::new()),
            intent_path,
            config: fast_config(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn job_type(&self) -> JobType {
        JobType::new(JOB_TYPE)
    }

    /// Build an orchestrator over the harness collaborators.
    ///
    /// Each call opens the stop intent file afresh, so calling this twice
    /// simulates a restart.
    pub fn orchestrator(&self, mode: ExecutionMode) -> IndexingOrchestrator {
        let collaborators = Collaborators {
            executor: self.executor.clone(),
            provider: self.provider.clone(),
            stop_intents: Arc::new(FileStopIntentStore::new(&self.intent_path)),
            sink: self.sink.clone(),
        };
        IndexingOrchestrator::new(self.job_type(), mode, self.config.clone(), collaborators)
            .expect("Failed to build orchestrator")
    }

    /// Build an orchestrator and pass its resume check.
    pub async fn ready_orchestrator(&self, mode: ExecutionMode) -> IndexingOrchestrator {
        let orchestrator = self.orchestrator(mode);
        orchestrator
            .check_and_resume()
            .await
            .expect("Resume check failed");
        orchestrator
    }

    /// Whether a stop intent is on disk for the harness job type.
    pub fn intent_is_set(&self) -> bool {
        FileStopIntentStore::new(&self.intent_path)
            .is_set(&self.job_type())
            .expect("Failed to read stop intents")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator config with millisecond delays.
///
/// Tests run on paused time, so the values only fix the order in which
/// timers fire.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        batch_size: 5,
        step_delay_ms: 10,
        retry_backoff_ms: 100,
        max_retry_backoff_ms: 1_000,
        max_consecutive_failures: 0,
        poll_interval_ms: 1_000,
        poll_cutoff_secs: 3_600,
        refresh_delay_ms: 50,
    }
}

/// Unwrap a client-stepped start.
pub fn stepped(started: StartedJob) -> JobHandle {
    match started {
        StartedJob::Stepped(handle) => handle,
        other => panic!("Expected a client-stepped job, got {other:?}"),
    }
}

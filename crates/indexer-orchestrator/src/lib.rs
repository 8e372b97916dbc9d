//! Indexing job orchestrator.
//!
//! Starts, steps, stops and resumes long-running bulk-indexing jobs against
//! an external indexing service, reconciling local state with what the
//! server reports.
//!
//! # Components
//!
//! - **JobController**: client-stepped batch loop with backoff and stop handling
//! - **StatusReconciler**: polls server status and detects completion
//! - **ResumeGuard**: re-attaches to running jobs at start-up and gates new starts
//! - **JobStateStore**: owner of each live job's state, keyed by job type
//! - **StopIntentStore**: the one piece of state that survives a restart
//! - **IndexingOrchestrator**: facade binding the above to one job type
//!
//! # Example
//!
//! ```ignore
//! use indexer_orchestrator::{Collaborators, IndexingOrchestrator, StartOptions, StartedJob};
//!
//! let orchestrator = IndexingOrchestrator::new(job_type, mode, config, collaborators)?;
//! orchestrator.check_and_resume().await?;
//!
//! if let StartedJob::Stepped(handle) = orchestrator.start(StartOptions::default()).await? {
//!     let summary = handle.wait().await?;
//!     println!("{}", summary.headline());
//! }
//! ```

mod collaborators;
mod controller;
mod error;
mod in_flight;
pub mod mock;
mod orchestrator;
mod reconciler;
mod resume;
mod state;
mod stop_intent;

pub use collaborators::{BatchExecutor, NoopSink, ProgressSink, StatusProvider};
pub use controller::{classify, ExitReason, JobController, JobHandle, StartOptions};
pub use error::OrchestratorError;
pub use in_flight::{InFlight, InFlightGuard};
pub use orchestrator::{Collaborators, IndexingOrchestrator, StartedJob};
pub use reconciler::{ReconciledStatus, ReconcilerCore, StatusReconciler, TickOutcome};
pub use resume::{GateState, ResumeGate, ResumeGuard, ResumeOutcome};
pub use state::{JobControls, JobState, JobStateStore, StopRequest, INSUFFICIENT_CREDITS};
pub use stop_intent::{FileStopIntentStore, MemoryStopIntentStore, StopIntentStore};

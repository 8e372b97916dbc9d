//! # indexer-types
//!
//! Shared domain types for the corpus-indexer workspace.
//!
//! This crate defines the data exchanged between the orchestrator, its
//! external collaborators and the presentation layer:
//! - Jobs: job identity, batch requests and responses
//! - Status: status snapshots and active-job reports from the server
//! - Progress: UI states, progress updates and final summaries
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::{BatchResponse, JobType};
//!
//! let job_type = JobType::new("topics");
//! let response = BatchResponse::new(5, 5, false);
//! assert_eq!(job_type.as_str(), "topics");
//! assert!(!response.done);
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod progress;

pub use config::{ExecutionMode, OrchestratorConfig, Settings, MAX_POLL_CUTOFF_SECS};
pub use error::{CollaboratorError, IndexerError};
pub use job::{
    ActiveJob, BatchOptions, BatchRequest, BatchResponse, JobId, JobType, StatusSnapshot,
};
pub use progress::{FinalSummary, JobOutcome, ProgressUpdate, RefreshReason, UiState};

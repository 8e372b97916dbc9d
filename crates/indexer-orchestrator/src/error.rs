//! Error types for the orchestrator crate.
//!
//! Only usage errors and resume-check failures surface here. Transport and
//! item-level failures inside a running job are absorbed into the job's
//! error log instead.

use indexer_types::{CollaboratorError, JobType};
use thiserror::Error;

/// Errors that can occur during orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A job of this type is already live
    #[error("A job of type '{0}' is already running")]
    JobAlreadyLive(JobType),

    /// `start` called before the initial resume check completed
    #[error("Resume check has not completed yet")]
    ResumeCheckPending,

    /// `check_and_resume` called while another check is running
    #[error("Resume check is already in progress")]
    ResumeCheckInProgress,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A collaborator call failed outside of a job loop
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// A job task ended without producing a summary (panic or abort)
    #[error("Job task aborted: {0}")]
    JobAborted(String),

    /// Stop intent could not be read or written
    #[error("Stop intent persistence error: {0}")]
    StopIntent(String),
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::StopIntent(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::StopIntent(err.to_string())
    }
}

//! Values the orchestrator hands to its presentation layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::JobType;

/// Visible state of a job widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiState {
    Idle,
    Processing,
    /// A stop was requested but background work may still be draining
    Stopping,
    Finished,
    Exhausted,
}

impl fmt::Display for UiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiState::Idle => write!(f, "idle"),
            UiState::Processing => write!(f, "processing"),
            UiState::Stopping => write!(f, "stopping"),
            UiState::Finished => write!(f, "finished"),
            UiState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Aggregate counters for a progress redraw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub processed: u64,
    pub total: Option<u64>,
    pub remaining: Option<u64>,
    pub errors_count: usize,
    /// Only known when the update comes from a status poll
    #[serde(default)]
    pub credits_remaining: Option<u64>,
}

impl ProgressUpdate {
    /// Completion ratio in percent, when the total is known and non-zero.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.processed as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Classified terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every item processed, no errors
    Completed,
    /// Every item processed, some errors recorded
    CompletedWithErrors,
    /// Ended early with errors and work left over
    Incomplete,
    /// Ended by the user
    Stopped,
    /// Ended because credits ran out
    Exhausted,
}

impl JobOutcome {
    /// Terminal widget state for this outcome.
    pub fn ui_state(&self) -> UiState {
        match self {
            JobOutcome::Completed | JobOutcome::CompletedWithErrors | JobOutcome::Incomplete => {
                UiState::Finished
            }
            JobOutcome::Stopped => UiState::Idle,
            JobOutcome::Exhausted => UiState::Exhausted,
        }
    }
}

/// Why a downstream refresh of aggregate counters was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// A client-stepped job reached a terminal outcome
    JobFinished,
    /// The reconciler saw the active → idle transition
    QueueDrained,
    /// The polling safety cutoff elapsed
    PollCutoff,
}

/// Report emitted once per job when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub job_type: JobType,
    pub outcome: JobOutcome,
    pub processed: u64,
    pub total: Option<u64>,
    pub elapsed_ms: u64,
    pub errors: Vec<String>,
}

impl FinalSummary {
    /// One-line description, distinct per outcome.
    pub fn headline(&self) -> String {
        match self.outcome {
            JobOutcome::Completed => "Completed cleanly".to_string(),
            JobOutcome::CompletedWithErrors => {
                format!("Completed with {} errors", self.errors.len())
            }
            JobOutcome::Incomplete => {
                format!("Incomplete: stopped with {} errors", self.errors.len())
            }
            JobOutcome::Stopped => "Stopped by user".to_string(),
            JobOutcome::Exhausted => "Stopped: insufficient credits".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcome: JobOutcome, errors: usize) -> FinalSummary {
        FinalSummary {
            job_type: JobType::new("topics"),
            outcome,
            processed: 10,
            total: Some(10),
            elapsed_ms: 1200,
            errors: (0..errors).map(|i| format!("error {i}")).collect(),
        }
    }

    #[test]
    fn test_headlines_are_distinct() {
        let headlines: std::collections::HashSet<_> = [
            summary(JobOutcome::Completed, 0),
            summary(JobOutcome::CompletedWithErrors, 2),
            summary(JobOutcome::Incomplete, 2),
            summary(JobOutcome::Stopped, 0),
            summary(JobOutcome::Exhausted, 1),
        ]
        .iter()
        .map(FinalSummary::headline)
        .collect();
        assert_eq!(headlines.len(), 5);
        assert_eq!(
            summary(JobOutcome::CompletedWithErrors, 3).headline(),
            "Completed with 3 errors"
        );
    }

    #[test]
    fn test_outcome_ui_state() {
        assert_eq!(JobOutcome::Completed.ui_state(), UiState::Finished);
        assert_eq!(JobOutcome::Exhausted.ui_state(), UiState::Exhausted);
        assert_eq!(JobOutcome::Stopped.ui_state(), UiState::Idle);
    }

    #[test]
    fn test_percent() {
        let update = ProgressUpdate {
            processed: 40,
            total: Some(100),
            ..Default::default()
        };
        assert_eq!(update.percent(), Some(40.0));
        assert_eq!(ProgressUpdate::default().percent(), None);
    }

    #[test]
    fn test_ui_state_serialization() {
        assert_eq!(serde_json::to_string(&UiState::Stopping).unwrap(), "\"stopping\"");
        assert_eq!(UiState::Exhausted.to_string(), "exhausted");
    }
}

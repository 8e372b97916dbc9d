//! Console rendering of job progress.

use std::sync::{Mutex, PoisonError};

use indexer_orchestrator::ProgressSink;
use indexer_types::{FinalSummary, JobOutcome, ProgressUpdate, RefreshReason, UiState};

/// Errors listed in a summary before the rest are elided.
const MAX_LISTED_ERRORS: usize = 10;

/// Prints states, counters and final summaries to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    last_line: Mutex<Option<String>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn print_once(&self, line: String) {
        let mut last = self.last_line.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() != Some(line.as_str()) {
            println!("{line}");
            *last = Some(line);
        }
    }
}

impl ProgressSink for ConsoleSink {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.print_once(format_progress(update));
    }

    fn on_state_change(&self, state: UiState) {
        self.print_once(format_state(state).to_string());
    }

    fn on_final_summary(&self, summary: &FinalSummary) {
        for line in format_summary(summary) {
            println!("{line}");
        }
    }

    fn on_refresh(&self, reason: RefreshReason) {
        if reason == RefreshReason::PollCutoff {
            println!("Stopped watching: polling time limit reached");
        }
    }
}

pub fn format_state(state: UiState) -> &'static str {
    match state {
        UiState::Idle => "Idle",
        UiState::Processing => "Processing...",
        UiState::Stopping => "Stopping...",
        UiState::Finished => "Finished",
        UiState::Exhausted => "Stopped: insufficient credits",
    }
}

pub fn format_progress(update: &ProgressUpdate) -> String {
    let mut line = match (update.total, update.percent()) {
        (Some(total), Some(percent)) => {
            format!("  {}/{} processed ({:.1}%)", update.processed, total, percent)
        }
        _ => format!("  {} processed", update.processed),
    };
    if update.errors_count > 0 {
        line.push_str(&format!(", {} errors", update.errors_count));
    }
    if let Some(credits) = update.credits_remaining {
        line.push_str(&format!(", {credits} credits left"));
    }
    line
}

pub fn format_summary(summary: &FinalSummary) -> Vec<String> {
    let marker = match summary.outcome {
        JobOutcome::Completed => "[ok]",
        JobOutcome::CompletedWithErrors => "[warn]",
        JobOutcome::Incomplete => "[fail]",
        JobOutcome::Stopped => "[stopped]",
        JobOutcome::Exhausted => "[credits]",
    };

    let mut lines = vec![format!("{marker} {}", summary.headline())];
    let processed = match summary.total {
        Some(total) => format!("{}/{}", summary.processed, total),
        None => summary.processed.to_string(),
    };
    lines.push(format!(
        "  {} {} items in {}",
        summary.job_type,
        processed,
        format_elapsed(summary.elapsed_ms)
    ));

    for error in summary.errors.iter().take(MAX_LISTED_ERRORS) {
        lines.push(format!("  - {error}"));
    }
    if summary.errors.len() > MAX_LISTED_ERRORS {
        lines.push(format!(
            "  ... and {} more",
            summary.errors.len() - MAX_LISTED_ERRORS
        ));
    }
    lines
}

fn format_elapsed(elapsed_ms: u64) -> String {
    let secs = elapsed_ms / 1000;
    match secs {
        0..=59 => format!("{}.{}s", secs, (elapsed_ms % 1000) / 100),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::JobType;

    fn summary(outcome: JobOutcome, errors: usize) -> FinalSummary {
        FinalSummary {
            job_type: JobType::new("topics"),
            outcome,
            processed: 40,
            total: Some(100),
            elapsed_ms: 75_000,
            errors: (0..errors).map(|i| format!("topic {i}: timeout")).collect(),
        }
    }

    #[test]
    fn test_format_progress() {
        let update = ProgressUpdate {
            processed: 40,
            total: Some(100),
            remaining: Some(60),
            errors_count: 2,
            credits_remaining: Some(7),
        };
        assert_eq!(
            format_progress(&update),
            "  40/100 processed (40.0%), 2 errors, 7 credits left"
        );
    }

    #[test]
    fn test_format_progress_unknown_total() {
        let update = ProgressUpdate {
            processed: 3,
            ..Default::default()
        };
        assert_eq!(format_progress(&update), "  3 processed");
    }

    #[test]
    fn test_summaries_are_distinct() {
        let first_lines: Vec<String> = [
            JobOutcome::Completed,
            JobOutcome::CompletedWithErrors,
            JobOutcome::Incomplete,
            JobOutcome::Stopped,
            JobOutcome::Exhausted,
        ]
        .into_iter()
        .map(|outcome| format_summary(&summary(outcome, 1))[0].clone())
        .collect();

        for (i, line) in first_lines.iter().enumerate() {
            for other in &first_lines[i + 1..] {
                assert_ne!(line, other);
            }
        }
        assert!(first_lines[4].contains("insufficient credits"));
    }

    #[test]
    fn test_summary_elides_long_error_lists() {
        let lines = format_summary(&summary(JobOutcome::Incomplete, 15));
        assert_eq!(lines[1], "  topics 40/100 items in 1m 15s");
        assert_eq!(lines.len(), 2 + MAX_LISTED_ERRORS + 1);
        assert_eq!(lines.last().unwrap(), "  ... and 5 more");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(1_250), "1.2s");
        assert_eq!(format_elapsed(125_000), "2m 5s");
        assert_eq!(format_elapsed(7_260_000), "2h 1m");
    }
}

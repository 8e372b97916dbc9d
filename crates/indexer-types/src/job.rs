//! Job identity and the wire shapes exchanged with the indexing service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of bulk-indexing job (e.g. `topics`, `external_content`).
///
/// At most one job per type may be live at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh, time-ordered job id.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Id used when the server reports an active job without one.
    ///
    /// The server keys such jobs by their type.
    pub fn for_type(job_type: &JobType) -> Self {
        Self(job_type.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution flags carried through every batch call of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Only process items tagged with this tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_tagged: Option<String>,
}

impl BatchOptions {
    pub fn only_tagged(tag: impl Into<String>) -> Self {
        Self {
            only_tagged: Some(tag.into()),
        }
    }
}

/// One call to the batch executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub job_id: JobId,
    pub job_type: JobType,
    pub batch_size: u32,
    #[serde(default)]
    pub options: BatchOptions,
}

/// Result of processing one slice of work.
///
/// `processed` and `remaining` are job-wide counts reported by the
/// server, not counts for this slice alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub processed: u64,
    pub remaining: u64,
    pub done: bool,
    /// Item-level failures inside an otherwise successful call
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub credits_exhausted: bool,
}

impl BatchResponse {
    pub fn new(processed: u64, remaining: u64, done: bool) -> Self {
        Self {
            processed,
            remaining,
            done,
            errors: Vec::new(),
            credits_exhausted: false,
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_credits_exhausted(mut self) -> Self {
        self.credits_exhausted = true;
        self
    }
}

/// Server-side progress of a job, polled by the status reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// A background worker is executing right now
    pub worker_active: bool,
    /// Work is still enqueued, even if no worker is executing right now
    pub queue_non_empty: bool,
    pub processed: u64,
    pub total: u64,
    #[serde(default)]
    pub credits_remaining: Option<u64>,
}

impl StatusSnapshot {
    pub fn active(processed: u64, total: u64) -> Self {
        Self {
            worker_active: true,
            queue_non_empty: true,
            processed,
            total,
            credits_remaining: None,
        }
    }

    pub fn idle(processed: u64, total: u64) -> Self {
        Self {
            worker_active: false,
            queue_non_empty: false,
            processed,
            total,
            credits_remaining: None,
        }
    }
}

/// Answer to "is a job of this type already running?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub active: bool,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub processed: Option<u64>,
    #[serde(default)]
    pub remaining: Option<u64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl ActiveJob {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn running(total: u64, processed: u64, remaining: u64) -> Self {
        Self {
            active: true,
            job_id: None,
            total: Some(total),
            processed: Some(processed),
            remaining: Some(remaining),
            started_at: None,
        }
    }
}

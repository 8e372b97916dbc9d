//! Persisted "stop in progress" flag.
//!
//! A stop cannot halt server-side background work instantly, so the
//! intent has to survive a restart: otherwise a user who stops and then
//! reloads would see "idle" while the queue is still draining. This is the
//! only state the orchestrator persists; everything else is re-derived from
//! the server.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use indexer_types::JobType;

use crate::error::OrchestratorError;

/// Storage for per-job-type stop intents.
pub trait StopIntentStore: Send + Sync {
    fn is_set(&self, job_type: &JobType) -> Result<bool, OrchestratorError>;

    fn set(&self, job_type: &JobType) -> Result<(), OrchestratorError>;

    /// Clearing an absent intent is a no-op.
    fn clear(&self, job_type: &JobType) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StopIntent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    requested_at: DateTime<Utc>,
}

type IntentMap = HashMap<String, StopIntent>;

/// Stop intents kept in a small JSON file.
#[derive(Debug)]
pub struct FileStopIntentStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStopIntentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<IntentMap, OrchestratorError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(IntentMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IntentMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, intents: &IntentMap) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(intents)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StopIntentStore for FileStopIntentStore {
    fn is_set(&self, job_type: &JobType) -> Result<bool, OrchestratorError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.contains_key(job_type.as_str()))
    }

    fn set(&self, job_type: &JobType) -> Result<(), OrchestratorError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut intents = self.load()?;
        if intents.contains_key(job_type.as_str()) {
            return Ok(());
        }
        intents.insert(
            job_type.as_str().to_string(),
            StopIntent {
                requested_at: Utc::now(),
            },
        );
        self.save(&intents)?;
        debug!(job_type = %job_type, path = ?self.path, "Persisted stop intent");
        Ok(())
    }

    fn clear(&self, job_type: &JobType) -> Result<(), OrchestratorError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut intents = self.load()?;
        if intents.remove(job_type.as_str()).is_some() {
            self.save(&intents)?;
            debug!(job_type = %job_type, "Cleared stop intent");
        }
        Ok(())
    }
}

/// Process-local stop intents, for tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryStopIntentStore {
    intents: Mutex<HashMap<JobType, DateTime<Utc>>>,
}

impl MemoryStopIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StopIntentStore for MemoryStopIntentStore {
    fn is_set(&self, job_type: &JobType) -> Result<bool, OrchestratorError> {
        let intents = self.intents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(intents.contains_key(job_type))
    }

    fn set(&self, job_type: &JobType) -> Result<(), OrchestratorError> {
        let mut intents = self.intents.lock().unwrap_or_else(PoisonError::into_inner);
        intents.entry(job_type.clone()).or_insert_with(Utc::now);
        Ok(())
    }

    fn clear(&self, job_type: &JobType) -> Result<(), OrchestratorError> {
        let mut intents = self.intents.lock().unwrap_or_else(PoisonError::into_inner);
        intents.remove(job_type);
        Ok(())
    }
}

// Persistence failures must never break a job; they are logged and the
// in-memory behaviour continues.

pub(crate) fn intent_is_set(store: &dyn StopIntentStore, job_type: &JobType) -> bool {
    store.is_set(job_type).unwrap_or_else(|e| {
        warn!(job_type = %job_type, error = %e, "Failed to read stop intent");
        false
    })
}

pub(crate) fn persist_intent(store: &dyn StopIntentStore, job_type: &JobType) {
    if let Err(e) = store.set(job_type) {
        warn!(job_type = %job_type, error = %e, "Failed to persist stop intent");
    }
}

pub(crate) fn clear_intent(store: &dyn StopIntentStore, job_type: &JobType) {
    if let Err(e) = store.clear(job_type) {
        warn!(job_type = %job_type, error = %e, "Failed to clear stop intent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> JobType {
        JobType::new("topics")
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("stop-intent.json");

        let store = FileStopIntentStore::new(&path);
        assert!(!store.is_set(&topics()).unwrap());
        store.set(&topics()).unwrap();
        assert!(path.exists());

        // a new instance stands in for a reloaded process
        let reopened = FileStopIntentStore::new(&path);
        assert!(reopened.is_set(&topics()).unwrap());
        assert!(!reopened.is_set(&JobType::new("external_content")).unwrap());

        reopened.clear(&topics()).unwrap();
        assert!(!FileStopIntentStore::new(&path).is_set(&topics()).unwrap());
    }

    #[test]
    fn test_file_store_clear_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStopIntentStore::new(dir.path().join("stop-intent.json"));
        store.clear(&topics()).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStopIntentStore::new(dir.path().join("stop-intent.json"));
        store.set(&topics()).unwrap();

        let json = std::fs::read_to_string(store.path()).unwrap();
        assert!(json.contains("\"topics\""));
        assert!(json.contains("\"requested_at\""));
    }

    #[test]
    fn test_file_store_corrupt_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop-intent.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStopIntentStore::new(&path);
        assert!(matches!(
            store.is_set(&topics()),
            Err(OrchestratorError::StopIntent(_))
        ));
        // the lenient helper falls back to "not set"
        assert!(!intent_is_set(&store, &topics()));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStopIntentStore::new();
        store.set(&topics()).unwrap();
        store.set(&topics()).unwrap();
        assert!(store.is_set(&topics()).unwrap());
        store.clear(&topics()).unwrap();
        assert!(!store.is_set(&topics()).unwrap());
    }
}

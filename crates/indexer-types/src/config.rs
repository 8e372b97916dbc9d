//! Configuration loading for corpus-indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `<config dir>/corpus-indexer/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// How batches get executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The orchestrator issues every batch call itself
    #[default]
    ClientStepped,
    /// A background worker processes the queue; the orchestrator only polls
    Queue,
}

/// Timing and sizing knobs for the job controller and status reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Items per batch call (default: 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Pause between successful batches (default: 500ms)
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// First retry delay after a transport failure (default: 5s)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for the growing retry delay (default: 60s)
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    /// Consecutive transport failures after which a job gives up; 0 retries
    /// for as long as work remains (default: 0)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Status poll period (default: 5s)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock limit for one polling session (default: 6 hours, at most 7 days)
    #[serde(default = "default_poll_cutoff_secs")]
    pub poll_cutoff_secs: u64,

    /// Delay before the post-job refresh, letting server storage settle (default: 2s)
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
}

fn default_batch_size() -> u32 {
    50
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

fn default_max_retry_backoff_ms() -> u64 {
    60_000
}

fn default_max_consecutive_failures() -> u32 {
    0
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

/// Upper bound accepted for `poll_cutoff_secs`.
pub const MAX_POLL_CUTOFF_SECS: u64 = 7 * 24 * 60 * 60;

fn default_poll_cutoff_secs() -> u64 {
    6 * 60 * 60
}

fn default_refresh_delay_ms() -> u64 {
    2_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            step_delay_ms: default_step_delay_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_cutoff_secs: default_poll_cutoff_secs(),
            refresh_delay_ms: default_refresh_delay_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be > 0".to_string());
        }
        if self.poll_cutoff_secs > MAX_POLL_CUTOFF_SECS {
            return Err(format!(
                "poll_cutoff_secs ({}) must be <= {MAX_POLL_CUTOFF_SECS}",
                self.poll_cutoff_secs
            ));
        }
        if self.max_retry_backoff_ms < self.retry_backoff_ms {
            return Err(format!(
                "max_retry_backoff_ms ({}) must be >= retry_backoff_ms ({})",
                self.max_retry_backoff_ms, self.retry_backoff_ms
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_cutoff(&self) -> Duration {
        Duration::from_secs(self.poll_cutoff_secs)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the indexing service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Job type driven by the CLI
    #[serde(default = "default_job_type")]
    pub job_type: String,

    /// Client-stepped or queue mode
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Directory holding the persisted stop intent
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:3000/indexing".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_job_type() -> String {
    "topics".to_string()
}

fn default_state_dir() -> String {
    ProjectDirs::from("", "", "corpus-indexer")
        .map(|p| p.data_local_dir().join("state"))
        .unwrap_or_else(|| PathBuf::from("./state"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            job_type: default_job_type(),
            mode: ExecutionMode::default(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (<config dir>/corpus-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IndexerError> {
        let config_dir = ProjectDirs::from("", "", "corpus-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("endpoint", default_endpoint())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("request_timeout_secs", default_request_timeout_secs() as i64)
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("job_type", default_job_type())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("state_dir", default_state_dir())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INDEXER_ENDPOINT, INDEXER_API_KEY, INDEXER_ORCHESTRATOR__BATCH_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.endpoint.trim().is_empty() {
            return Err(IndexerError::Config("endpoint must not be empty".to_string()));
        }
        if self.job_type.trim().is_empty() {
            return Err(IndexerError::Config("job_type must not be empty".to_string()));
        }
        self.orchestrator.validate().map_err(IndexerError::Config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path of the file persisting stop intents.
    pub fn stop_intent_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("stop-intent.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.job_type, "topics");
        assert_eq!(settings.mode, ExecutionMode::ClientStepped);
        assert_eq!(settings.orchestrator.batch_size, 50);
        assert!(settings.api_key.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_orchestrator_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.step_delay(), Duration::from_millis(500));
        assert_eq!(config.retry_backoff(), Duration::from_secs(5));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.poll_cutoff(), Duration::from_secs(21_600));
        assert_eq!(config.refresh_delay(), Duration::from_secs(2));
        // transient failures never end a job on their own
        assert_eq!(config.max_consecutive_failures, 0);
    }

    #[test]
    fn test_orchestrator_config_validation() {
        let mut config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 10;
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 1000;
        config.max_retry_backoff_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_cutoff_is_bounded() {
        let mut config = OrchestratorConfig {
            poll_cutoff_secs: MAX_POLL_CUTOFF_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.poll_cutoff_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.contains("poll_cutoff_secs"));
    }

    #[test]
    fn test_load_rejects_huge_poll_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutoff.toml");
        std::fs::write(&path, "[orchestrator]\npoll_cutoff_secs = 9999999999\n").unwrap();

        let result = Settings::load(Some(path.to_str().unwrap()));
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
endpoint = "https://forum.example.com/indexing"
job_type = "external_content"
mode = "queue"

[orchestrator]
batch_size = 25
poll_interval_ms = 1500
"#
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.endpoint, "https://forum.example.com/indexing");
        assert_eq!(settings.job_type, "external_content");
        assert_eq!(settings.mode, ExecutionMode::Queue);
        assert_eq!(settings.orchestrator.batch_size, 25);
        assert_eq!(settings.orchestrator.poll_interval_ms, 1500);
        // untouched keys keep their defaults
        assert_eq!(settings.orchestrator.step_delay_ms, 500);
    }

    #[test]
    fn test_load_rejects_zero_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[orchestrator]\nbatch_size = 0\n").unwrap();

        let result = Settings::load(Some(path.to_str().unwrap()));
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[test]
    fn test_stop_intent_path() {
        let settings = Settings {
            state_dir: "/var/lib/indexer".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.stop_intent_path(),
            PathBuf::from("/var/lib/indexer/stop-intent.json")
        );
    }

    #[test]
    fn test_orchestrator_config_serde_roundtrip() {
        let config = OrchestratorConfig::default().with_batch_size(7);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let sparse: OrchestratorConfig = serde_json::from_str(r#"{"batch_size":9}"#).unwrap();
        assert_eq!(sparse.batch_size, 9);
        assert_eq!(sparse.refresh_delay_ms, 2_000);
    }
}

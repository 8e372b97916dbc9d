//! CLI argument parsing for corpus-indexer.
//!
//! Global flags override every other configuration source.

use clap::{Parser, Subcommand, ValueEnum};

use indexer_types::ExecutionMode;

/// Corpus Indexer
///
/// Drives bulk indexing jobs against the indexing service and survives
/// restarts, network errors and exhausted credits.
#[derive(Parser, Debug)]
#[command(name = "corpus-indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/corpus-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Indexing service base URL
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Job type to operate on (e.g. topics, external_content)
    #[arg(short, long, global = true)]
    pub job_type: Option<String>,

    /// Execution mode
    #[arg(long, global = true, value_enum)]
    pub mode: Option<ModeArg>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Indexer commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a job (or re-attach to a running one) and follow it to the end
    Run {
        /// Items per batch call
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Only index items carrying this tag
        #[arg(long)]
        only_tagged: Option<String>,

        /// Item count, if already known
        #[arg(long)]
        total: Option<u64>,
    },

    /// Follow a server-side job until it goes idle
    Watch {
        /// Poll interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Stop the running job
    Stop,

    /// Show the active job and its status
    Status,
}

/// Execution mode as spelled on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    ClientStepped,
    Queue,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::ClientStepped => ExecutionMode::ClientStepped,
            ModeArg::Queue => ExecutionMode::Queue,
        }
    }
}

/// Global flags that override loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<String>,
    pub log_level: Option<String>,
    pub endpoint: Option<String>,
    pub job_type: Option<String>,
    pub mode: Option<ExecutionMode>,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            log_level: self.log_level.clone(),
            endpoint: self.endpoint.clone(),
            job_type: self.job_type.clone(),
            mode: self.mode.map(ExecutionMode::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_with_options() {
        let cli = Cli::parse_from([
            "corpus-indexer",
            "run",
            "--batch-size",
            "25",
            "--only-tagged",
            "faq",
            "--total",
            "300",
        ]);
        match cli.command {
            Commands::Run {
                batch_size,
                only_tagged,
                total,
            } => {
                assert_eq!(batch_size, Some(25));
                assert_eq!(only_tagged.as_deref(), Some("faq"));
                assert_eq!(total, Some(300));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::parse_from(["corpus-indexer", "run"]);
        match cli.command {
            Commands::Run {
                batch_size,
                only_tagged,
                total,
            } => {
                assert!(batch_size.is_none());
                assert!(only_tagged.is_none());
                assert!(total.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_watch_interval() {
        let cli = Cli::parse_from(["corpus-indexer", "watch", "--interval-ms", "1500"]);
        match cli.command {
            Commands::Watch { interval_ms } => assert_eq!(interval_ms, Some(1500)),
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_stop_and_status() {
        let cli = Cli::parse_from(["corpus-indexer", "stop"]);
        assert!(matches!(cli.command, Commands::Stop));

        let cli = Cli::parse_from(["corpus-indexer", "status"]);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "corpus-indexer",
            "status",
            "--endpoint",
            "https://forum.example.com/indexing",
            "--job-type",
            "external_content",
            "--mode",
            "queue",
            "--log-level",
            "debug",
            "--config",
            "/tmp/indexer.toml",
        ]);
        let overrides = cli.overrides();
        assert_eq!(
            overrides.endpoint.as_deref(),
            Some("https://forum.example.com/indexing")
        );
        assert_eq!(overrides.job_type.as_deref(), Some("external_content"));
        assert_eq!(overrides.mode, Some(ExecutionMode::Queue));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(overrides.config.as_deref(), Some("/tmp/indexer.toml"));
    }

    #[test]
    fn test_cli_mode_values() {
        let cli = Cli::parse_from(["corpus-indexer", "--mode", "client-stepped", "run"]);
        assert_eq!(cli.mode, Some(ModeArg::ClientStepped));

        let result = Cli::try_parse_from(["corpus-indexer", "--mode", "batch", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["corpus-indexer"]).is_err());
    }
}

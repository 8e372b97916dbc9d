//! Corpus indexer command-line front end.
//!
//! Wires the HTTP client, the file-backed stop intent store and a console
//! progress sink into an `IndexingOrchestrator`.

pub mod cli;
pub mod commands;
pub mod presenter;

pub use cli::{Cli, Commands, ModeArg, Overrides};
pub use commands::{load_settings, run_job, show_status, stop_job, watch_job};
pub use presenter::ConsoleSink;

//! Error types for the indexing service client.

use thiserror::Error;

/// Errors raised while building a client.
///
/// Failures of individual calls are reported as
/// [`indexer_types::CollaboratorError`] so the orchestrator can classify them.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The HTTP client could not be constructed
    #[error("Client configuration error: {0}")]
    Config(String),

    /// Invalid endpoint URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

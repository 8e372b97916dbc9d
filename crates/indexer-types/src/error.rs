//! Error types for the corpus-indexer system.

use thiserror::Error;

/// Errors raised while loading and validating settings.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors reported by the external collaborators (batch executor and
/// status provider).
///
/// Failures for which [`is_transient`](Self::is_transient) holds are logged
/// and retried. Anything else (a 4xx rejection other than 408/429, or an
/// undecodable body) ends a client-stepped job on the spot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The request never produced a response (connection refused, reset, DNS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request timed out
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success status
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl CollaboratorError {
    /// Whether retrying the same request later can plausibly succeed.
    ///
    /// Client errors other than 408 and 429 are not retryable.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Transport(_) | CollaboratorError::Timeout => true,
            CollaboratorError::Rejected { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            CollaboratorError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::Config("missing endpoint".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing endpoint");

        let err = CollaboratorError::Rejected {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Request rejected with status 503: busy");

        let err = CollaboratorError::Timeout;
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CollaboratorError::Timeout.is_transient());
        assert!(CollaboratorError::Transport("reset".into()).is_transient());
        assert!(CollaboratorError::Rejected {
            status: 429,
            message: String::new()
        }
        .is_transient());
        assert!(CollaboratorError::Rejected {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(!CollaboratorError::Rejected {
            status: 403,
            message: String::new()
        }
        .is_transient());
        assert!(!CollaboratorError::Decode("bad json".into()).is_transient());
    }
}

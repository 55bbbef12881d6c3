//! Error types for the CorpusQA engine
//!
//! Provides a typed error taxonomy for collaborator failures:
//! - Retrieval branch failures (recovered at fan-in, never surfaced)
//! - Completion endpoint failures and deadline overruns
//! - Conversation store failures
//!
//! Nothing in this taxonomy is expected to reach a caller of the public
//! engine entry points as an `Err`; the engine degrades instead.

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    // Collaborator errors
    #[error("Vector index error: {message}")]
    VectorIndex { message: String },

    #[error("Entity graph error: {message}")]
    EntityGraph { message: String },

    #[error("Completion endpoint error: {message}")]
    CompletionFailed { message: String },

    #[error("Completion timed out after {timeout_ms}ms")]
    CompletionTimeout { timeout_ms: u64 },

    #[error("Segment lookup error: {message}")]
    SegmentLookup { message: String },

    // Conversation history store
    #[error("History store error: {message}")]
    HistoryStore { message: String },

    // Local failures
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True when the failure was a deadline overrun rather than a hard error
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::CompletionTimeout { .. } => true,
            EngineError::HttpClient(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// True when the failure came from an external collaborator
    pub fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            EngineError::VectorIndex { .. }
                | EngineError::EntityGraph { .. }
                | EngineError::CompletionFailed { .. }
                | EngineError::CompletionTimeout { .. }
                | EngineError::SegmentLookup { .. }
                | EngineError::HistoryStore { .. }
        )
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::HistoryStore {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_predicate() {
        let err = EngineError::CompletionTimeout { timeout_ms: 30_000 };
        assert!(err.is_timeout());
        assert!(err.is_collaborator_error());

        let err = EngineError::Internal {
            message: "boom".into(),
        };
        assert!(!err.is_timeout());
        assert!(!err.is_collaborator_error());
    }
}

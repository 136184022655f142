//! Error types for the engram memory engine
//!
//! Provides the error hierarchy shared by every engine component.

use thiserror::Error;

/// The main error type for memory engine operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Validation Errors ==========
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule validation error: {0}")]
    RuleValidation(String),

    // ========== Lookup Errors ==========
    #[error("Not found: {0}")]
    NotFound(String),

    // ========== Dependency Errors ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Summarization error: {0}")]
    Summarization(String),

    // ========== Serialization Errors ==========
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ========== Rule Errors ==========
    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    // ========== Memory Errors ==========
    #[error("Memory operation error: {0}")]
    MemoryOperation(String),

    // ========== IO Errors ==========
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for memory engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is a schema or field violation.
    ///
    /// Validation errors are fatal for the triggering call and are
    /// never retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::RuleValidation(_))
    }

    /// Returns true if this error is a missing-id lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if this error came from an external collaborator
    /// (backing store, cache, embedding provider, summarizer)
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Cache(_)
                | Error::Embedding(_)
                | Error::Summarization(_)
        )
    }

    /// Returns true if the operation can be degraded to a local
    /// fallback instead of failing the caller
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::Embedding(_) | Error::Summarization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("wm_123".to_string());
        assert_eq!(err.to_string(), "Not found: wm_123");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Validation("bad field".to_string()).is_validation());
        assert!(Error::RuleValidation("missing name".to_string()).is_validation());
        assert!(!Error::Storage("down".to_string()).is_validation());

        assert!(Error::Embedding("timeout".to_string()).is_dependency());
        assert!(Error::Summarization("timeout".to_string()).is_dependency());
        assert!(Error::Storage("down".to_string()).is_dependency());
        assert!(!Error::NotFound("x".to_string()).is_dependency());
    }

    #[test]
    fn test_error_degradable() {
        assert!(Error::Embedding("err".to_string()).is_degradable());
        assert!(Error::Summarization("err".to_string()).is_degradable());
        assert!(!Error::Storage("err".to_string()).is_degradable());
    }
}

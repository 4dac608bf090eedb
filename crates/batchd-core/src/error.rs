//! Error types for batchd

use thiserror::Error;

/// Main error type for batchd
#[derive(Error, Debug)]
pub enum BatchdError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence store error
    #[error("Store error: {0}")]
    Store(String),

    /// Node agent error
    #[error("Agent error: {0}")]
    Agent(String),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Experiment not found
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for batchd operations
pub type BatchdResult<T> = Result<T, BatchdError>;

impl From<serde_json::Error> for BatchdError {
    fn from(err: serde_json::Error) -> Self {
        BatchdError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BatchdError {
    fn from(err: toml::de::Error) -> Self {
        BatchdError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BatchdError::ExperimentNotFound("exp-1".to_string());
        assert_eq!(err.to_string(), "Experiment not found: exp-1");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BatchdError = io_err.into();
        assert!(matches!(err, BatchdError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: BatchdError = json_err.into();
        assert!(matches!(err, BatchdError::Serialization(_)));
    }
}

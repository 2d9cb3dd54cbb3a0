//! Error types for the execution pipeline.
//!
//! Every stage passes errors through unchanged. The only place an error is
//! transformed is the end of a transaction, see [`ExecutionError::Rollback`].

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Returned by `Validator::validate`; nothing downstream has run.
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
    /// Returned by `EventProducer::events` after a successful execute.
    #[error("Event production error: {0}")]
    Events(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Database error: {0}")]
    Database(String),
    /// The rollback triggered by `cause` failed as well.
    #[error("Rollback failed: {reason} (caused by: {cause})")]
    Rollback {
        cause: Box<ExecutionError>,
        reason: String,
    },
    #[error("Event store error: {0}")]
    EventStore(String),
    #[error("Invocation cancelled")]
    Cancelled,
    #[error("Invocation deadline exceeded")]
    DeadlineExceeded,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Querier {0} finished without a result")]
    MissingResult(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ExecutionError {
    /// The error that started the failure, looking through rollback wrappers.
    pub fn root_cause(&self) -> &ExecutionError {
        match self {
            ExecutionError::Rollback { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.root_cause(),
            ExecutionError::Cancelled | ExecutionError::DeadlineExceeded
        )
    }
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        ExecutionError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for ExecutionError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        ExecutionError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

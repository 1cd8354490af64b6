//! Engine error model.

use thiserror::Error;

/// Result type used across the projection engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error.
///
/// Every failure either aborts the call that triggered it or is logged and
/// retried by the runner; nothing is swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The caller violated the lifecycle protocol (selection redeclared,
    /// start while running, operation on a deleted instance, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Reading from the event source failed or timed out. Retried by the runner.
    #[error("transient event source failure: {0}")]
    TransientSource(String),

    /// Persisting a checkpoint failed. In-memory progress is kept.
    #[error("checkpoint failed: {0}")]
    CheckpointFailure(String),

    /// A stored checkpoint could not be decoded.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// The user-supplied handler rejected an event.
    #[error("handler failed on {stream}@{offset}: {message}")]
    Handler {
        stream: String,
        offset: u64,
        message: String,
    },

    /// Construction-time configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker thread could not be spawned or panicked.
    #[error("worker failure: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientSource(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::CheckpointFailure(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptCheckpoint(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether the runner should retry the failed step instead of giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientSource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_failures_are_retryable() {
        assert!(EngineError::transient("timeout").is_retryable());
        assert!(!EngineError::protocol("selection already declared").is_retryable());
        assert!(!EngineError::checkpoint("disk full").is_retryable());
        assert!(!EngineError::corrupt("bad json").is_retryable());
    }

    #[test]
    fn handler_error_names_the_event() {
        let err = EngineError::Handler {
            stream: "orders-1".to_string(),
            offset: 7,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "handler failed on orders-1@7: boom");
    }
}

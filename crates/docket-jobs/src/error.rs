//! Job error types.

use crate::job::{JobId, JobStatus};
use std::error::Error as StdError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed enqueue options. Raised before any store access.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic storage failure reported by a backend.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Handler failed, panicked, or is missing.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Handler did not settle within the job timeout.
    #[error("Job timed out after {0} ms")]
    Timeout(u64),

    /// Lifecycle operation not allowed from the current status.
    #[error("Invalid transition: cannot {action} a job that is {status}")]
    InvalidTransition {
        status: JobStatus,
        action: &'static str,
    },

    /// The stored record left the status a write expected.
    #[error("Conflict: job {id} is {actual}, expected {expected}")]
    Conflict {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// Worker lifecycle misuse.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Creates a handler error from any displayable value.
    pub fn handler(message: impl Into<String>) -> Self {
        JobError::Handler(message.into())
    }

    /// Returns true if the error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            JobError::Storage(_)
                | JobError::Redis(_)
                | JobError::Pool(_)
                | JobError::Serialization(_)
        )
    }

    /// Returns true if a job failing with this error may run again.
    ///
    /// Validation, lifecycle and configuration errors are permanent: a
    /// handler returning one fails its job without consuming retries.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            JobError::Validation(_)
                | JobError::InvalidTransition { .. }
                | JobError::Conflict { .. }
                | JobError::Configuration(_)
                | JobError::Worker(_)
        )
    }

    /// Renders the error and its `source()` chain, one cause per line.
    pub fn trace(&self) -> String {
        let mut trace = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            trace.push_str("\n  caused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_handler() {
        let err = JobError::handler("boom");
        assert!(err.is_retryable());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_is_retryable_timeout() {
        let err = JobError::Timeout(50);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_is_not_retryable_validation() {
        let err = JobError::Validation("attempts must be an object".into());
        assert!(!err.is_retryable());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_is_retryable_transient_storage() {
        assert!(JobError::Storage("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_is_not_retryable_lifecycle() {
        let err = JobError::Conflict {
            id: JobId::new(3),
            expected: JobStatus::Queued,
            actual: JobStatus::Dequeued,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Conflict: job 3 is dequeued, expected queued");
        assert!(!JobError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_storage_errors() {
        assert!(JobError::Storage("connection refused".into()).is_storage());
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(JobError::from(serde_err).is_storage());
    }

    #[test]
    fn test_error_display_timeout() {
        let err = JobError::Timeout(60);
        assert!(err.to_string().contains("60 ms"));
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = JobError::InvalidTransition {
            status: JobStatus::Complete,
            action: "cancel",
        };
        let msg = err.to_string();
        assert!(msg.contains("cancel") && msg.contains("complete"));
    }

    #[test]
    fn test_trace_includes_source_chain() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = JobError::from(serde_err);
        let trace = err.trace();
        assert!(trace.starts_with("Serialization error"));
    }
}

//! Engine error types.
//!
//! The engine exposes a closed set of error kinds. Precondition failures
//! surface verbatim to the caller; best-effort side effects (hooks, backlog
//! updates, artifact saves) are logged as warnings and never reach this enum.

use thiserror::Error;

/// Errors that can occur in engine, store, and handler operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid transition from '{from}' to '{to}': {detail}")]
    InvalidTransition {
        from: String,
        to: String,
        detail: String,
    },

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("artifact '{name}' not found for task '{task_id}'")]
    ArtifactNotFound { task_id: String, name: String },

    #[error("failed validation step carries no pipeline result")]
    PipelineResultNotFound,

    #[error("work dir '{0}' not found")]
    WorkDirNotFound(String),

    #[error("artifact name '{0}' contains a path separator or parent reference")]
    PathTraversal(String),

    #[error("{0} is empty")]
    EmptyValue(String),

    #[error("unsupported operating system '{0}'")]
    UnsupportedOs(String),

    #[error("unknown step result status '{0}'")]
    UnknownStepResultStatus(String),

    #[error("task '{task_id}' state is corrupted: {detail}")]
    CorruptedState { task_id: String, detail: String },

    #[error("task '{0}' is locked by another process")]
    Locked(String),

    #[error("operation canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Create an untyped error with a descriptive message
    pub fn other(msg: impl Into<String>) -> Self {
        EngineError::Other(msg.into())
    }

    /// Check if this error is the cancellation passthrough
    pub fn is_canceled(&self) -> bool {
        matches!(self, EngineError::Canceled)
    }

    /// Check if this error is a lock-contention failure
    pub fn is_locked(&self) -> bool {
        matches!(self, EngineError::Locked(_))
    }

    /// Check if this error is the not-found kind
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::TaskNotFound(_) | EngineError::ArtifactNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EngineError::InvalidTransition {
            from: "running".to_string(),
            to: "pending".to_string(),
            detail: "not in transition graph".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid transition from 'running' to 'pending': not in transition graph"
        );

        let err = EngineError::TaskNotFound("task-20250101-120000".to_string());
        assert_eq!(err.to_string(), "task 'task-20250101-120000' not found");
    }

    #[test]
    fn test_predicates() {
        assert!(EngineError::Canceled.is_canceled());
        assert!(EngineError::Locked("t".to_string()).is_locked());
        assert!(EngineError::TaskNotFound("t".to_string()).is_not_found());
        assert!(!EngineError::Canceled.is_locked());
    }
}

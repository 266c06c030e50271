//! Error types for the core crate.

use std::time::Duration;
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Provider request failed; the only error that ends a chat turn from outside.
    #[error("provider error: {0}")]
    Provider(#[from] mcpbridge_provider::ProviderError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Task error.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The model kept requesting tools past the round cap.
    #[error("chat turn exceeded {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: usize },

    /// The chat turn ran past its wall-clock cap.
    #[error("chat turn timed out after {0:?}")]
    TurnTimeout(Duration),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },
}

/// Task-specific errors.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A task projection broke the status invariants.
    #[error("task {task_id} failed validation: {message}")]
    Validation { task_id: String, message: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::RoundLimitExceeded { max_rounds: 3 };
        assert_eq!(err.to_string(), "chat turn exceeded 3 rounds");

        let err: CoreError = TaskError::Validation {
            task_id: "tsk_1".to_string(),
            message: "completed task must report progress 100".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("task error: task tsk_1"));
    }

    #[test]
    fn test_provider_errors_convert() {
        let err: CoreError = mcpbridge_provider::ProviderError::NoDefaultProvider.into();
        assert!(matches!(err, CoreError::Provider(_)));
    }
}

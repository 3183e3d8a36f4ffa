//! Custom error types for Sentinel.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the agent.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the reasoning engine, classified so the loop controller
/// can pick the right recovery path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    /// The model call did not complete within the configured timeout.
    #[error("Reasoning call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider rejected or failed the call (rate limit, auth, 5xx,
    /// process exit failure).
    #[error("Reasoning provider error: {0}")]
    Provider(String),

    /// The response did not match the expected schema. The target
    /// structure is never partially populated.
    #[error("Reasoning response did not match expected schema: {0}")]
    Parse(String),
}

impl ReasoningError {
    /// Parse failures have their own recovery policy (stricter-prompt
    /// retry); timeouts and provider errors share backoff retries.
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

/// Main error type for Sentinel operations
#[derive(Error, Debug)]
pub enum SentinelError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Missing required collaborator or tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    // =========================================================================
    // Incident Store Errors
    // =========================================================================
    /// Store operation failed
    #[error("Incident store error: {message}")]
    Store { message: String },

    /// Unknown incident id
    #[error("Unknown incident: {id}")]
    UnknownIncident { id: String },

    /// Two workers attempted to claim the same incident. The loser
    /// aborts without mutating incident status and does not retry.
    #[error("Incident {id} is already claimed (status: {status})")]
    LockConflict { id: String, status: String },

    /// Attempted status transition violates monotonicity
    #[error("Illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: String,
        to: String,
    },

    // =========================================================================
    // Loop Execution Errors
    // =========================================================================
    /// Reasoning engine failure (timeout, provider, parse)
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    /// Action executor failed to run the proposed action
    #[error("Action execution failed for '{action}': {message}")]
    ActionExecution { action: String, message: String },

    /// Context hydrator failure; the loop degrades to an empty bundle
    #[error("Context unavailable: {message}")]
    ContextUnavailable { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SentinelError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a context-unavailable error
    pub fn context(message: impl Into<String>) -> Self {
        Self::ContextUnavailable {
            message: message.into(),
        }
    }

    /// Create an action execution error
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionExecution {
            action: action.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable within a run (handled by the
    /// loop controller, never surfaced as a crashed run unless retries
    /// are exhausted).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Reasoning(_) | Self::ActionExecution { .. } | Self::ContextUnavailable { .. }
        )
    }

    /// Check if this error is fatal (should abort the worker process at
    /// startup rather than fail per-incident).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingTool { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::MissingTool { .. } => 6,
            Self::LockConflict { .. } => 3,
            Self::Store { .. } | Self::UnknownIncident { .. } | Self::IllegalTransition { .. } => 4,
            _ => 1,
        }
    }
}

/// Type alias for Sentinel results
pub type Result<T> = std::result::Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SentinelError::LockConflict {
            id: "abc".into(),
            status: "processing".into(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("processing"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SentinelError::context("vector index down").is_recoverable());
        assert!(SentinelError::action("restart", "exec failed").is_recoverable());
        assert!(
            SentinelError::Reasoning(ReasoningError::Provider("rate limit".into()))
                .is_recoverable()
        );
        assert!(!SentinelError::config("bad file").is_recoverable());
    }

    #[test]
    fn test_is_fatal() {
        assert!(SentinelError::config("missing").is_fatal());
        assert!(SentinelError::InvalidConfig {
            field: "max_iterations".into(),
            reason: "must be > 0".into()
        }
        .is_fatal());
        assert!(!SentinelError::store("write failed").is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SentinelError::config("test").exit_code(), 7);
        assert_eq!(
            SentinelError::MissingTool {
                tool: "claude".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(
            SentinelError::LockConflict {
                id: "a".into(),
                status: "processing".into()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_reasoning_error_is_parse() {
        assert!(ReasoningError::Parse("missing field".into()).is_parse());
        assert!(!ReasoningError::Timeout(Duration::from_secs(30)).is_parse());
        assert!(!ReasoningError::Provider("503".into()).is_parse());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: SentinelError = io_err.into();
        assert!(matches!(err, SentinelError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}

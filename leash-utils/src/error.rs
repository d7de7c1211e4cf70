//! Error types for leash
//!
//! Provides a unified error type used across all leash crates.

use std::path::PathBuf;

/// Main error type for leash operations
#[derive(Debug, thiserror::Error)]
pub enum LeashError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection closed")]
    ConnectionClosed,

    // === Routing Errors ===

    #[error("No target connected for project '{project}' (known projects: {})", .known_projects.join(", "))]
    NoTargetConnected {
        project: String,
        known_projects: Vec<String>,
    },

    // === Timeout Errors ===

    #[error("Command '{action}' timed out after {timeout_ms}ms")]
    CommandTimedOut { action: String, timeout_ms: u64 },

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    WaitTimedOut { what: String, timeout_ms: u64 },

    // === Target Errors ===

    #[error("Target error: {0}")]
    Target(String),

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeashError {
    /// Create a connection-refused error
    pub fn connection_refused(msg: impl Into<String>) -> Self {
        Self::ConnectionRefused(msg.into())
    }

    /// Create a no-target-connected error
    pub fn no_target(project: impl Into<String>, known_projects: Vec<String>) -> Self {
        Self::NoTargetConnected {
            project: project.into(),
            known_projects,
        }
    }

    /// Create a command-timeout error
    pub fn command_timed_out(action: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimedOut {
            action: action.into(),
            timeout_ms,
        }
    }

    /// Create a wait-timeout error
    pub fn wait_timed_out(what: impl Into<String>, timeout_ms: u64) -> Self {
        Self::WaitTimedOut {
            what: what.into(),
            timeout_ms,
        }
    }

    /// Create a target-reported error
    pub fn target(msg: impl Into<String>) -> Self {
        Self::Target(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    ///
    /// Routing and timeout failures are safe to retry once conditions
    /// change (a target registers, the target catches up). Everything
    /// else requires caller intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoTargetConnected { .. }
                | Self::CommandTimedOut { .. }
                | Self::WaitTimedOut { .. }
        )
    }
}

/// Result type alias using LeashError
pub type Result<T> = std::result::Result<T, LeashError>;

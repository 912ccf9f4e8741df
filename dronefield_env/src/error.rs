//! Error types for the Dronefield environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Target process does not exist (exited and reaped)
    #[error("Process gone: {0}")]
    ProcessGone(String),

    /// Signal could not be delivered for another reason (permissions, ...)
    #[error("Signal failed: {0}")]
    SignalFailed(String),
}

impl EnvError {
    /// Creates a process-gone error.
    pub fn gone(pid: impl std::fmt::Display) -> Self {
        Self::ProcessGone(pid.to_string())
    }

    /// Creates a signal failure error.
    pub fn signal(msg: impl Into<String>) -> Self {
        Self::SignalFailed(msg.into())
    }
}

//! Error types shared by every Dronefield component.

use thiserror::Error;

/// Errors raised while setting up or running the fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A wire record could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A channel read or write failed (I/O error, short read, closed peer)
    #[error("Transfer error: {0}")]
    Transfer(#[from] std::io::Error),

    /// Resource creation failed before the frame loop started
    #[error("Setup error: {0}")]
    Setup(String),

    /// Worker arguments were missing or malformed
    #[error("Argument error: {0}")]
    Argument(String),
}

impl FleetError {
    /// Creates a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a setup error.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Creates an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }
}

//! Error types for port detection and serial transactions

use thiserror::Error;

/// Errors that can occur during detection or a serial transaction
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Failed to open serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// The platform open call did not complete in time
    #[error("timeout opening {port} after {timeout_ms}ms")]
    OpenTimeout { port: String, timeout_ms: u64 },

    /// No response line before the deadline
    #[error("no response from {port} within {timeout_ms}ms")]
    ResponseTimeout { port: String, timeout_ms: u64 },

    /// I/O error during write or read
    #[error("I/O error on {port}: {reason}")]
    IoError { port: String, reason: String },
}

impl DetectError {
    /// Check if this error is timeout-class (open or response deadline)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DetectError::OpenTimeout { .. } | DetectError::ResponseTimeout { .. }
        )
    }
}

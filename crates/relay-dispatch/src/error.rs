//! Error types for the dispatcher

use relay_detect::DetectError;
use thiserror::Error;

/// Errors that can occur while dispatching
///
/// Every variant terminates only the job it belongs to; the queue always
/// advances to the next job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Logical identifier is not in the registry
    #[error("device not recognized: {0}")]
    UnrecognizedDevice(String),

    /// The OS or driver refused to open the port
    #[error("failed to open {port}: {reason}")]
    PortOpen { port: String, reason: String },

    /// The platform open call did not complete in time
    #[error("timeout opening {port} after {timeout_ms}ms")]
    OpenTimeout { port: String, timeout_ms: u64 },

    /// No reply line within the job window
    #[error("no response from {port} within {timeout_ms}ms")]
    ResponseTimeout { port: String, timeout_ms: u64 },

    /// Unexpected failure during write or read
    #[error("transaction fault on {port}: {reason}")]
    TransactionFault { port: String, reason: String },

    /// Port enumeration failed, the registry was left untouched
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The dispatcher actor has stopped
    #[error("dispatcher is not running")]
    Closed,
}

impl DispatchError {
    /// Check if this error is timeout-class
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DispatchError::OpenTimeout { .. } | DispatchError::ResponseTimeout { .. }
        )
    }
}

impl From<DetectError> for DispatchError {
    fn from(e: DetectError) -> Self {
        match e {
            DetectError::OpenFailed { port, reason } => DispatchError::PortOpen { port, reason },
            DetectError::OpenTimeout { port, timeout_ms } => {
                DispatchError::OpenTimeout { port, timeout_ms }
            }
            DetectError::ResponseTimeout { port, timeout_ms } => {
                DispatchError::ResponseTimeout { port, timeout_ms }
            }
            DetectError::IoError { port, reason } => {
                DispatchError::TransactionFault { port, reason }
            }
            DetectError::EnumerationFailed(reason) => DispatchError::ScanFailed(reason),
        }
    }
}

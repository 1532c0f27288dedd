//! Dispatcher event stream
//!
//! Observers subscribe to a broadcast channel of everything the worker
//! does. Events are informational; dropping them never affects jobs.

use relay_detect::ScanReport;
use relay_protocol::DeviceCommand;

use crate::job::{JobId, JobOutcome, JobState};

/// Events emitted by the dispatcher
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    // -------------------------------------------------------------------------
    // Job lifecycle
    // -------------------------------------------------------------------------
    /// A job entered the queue
    JobQueued {
        /// Job identifier
        id: JobId,
        /// Registry key as given by the caller
        device: String,
        /// Command payload
        command: DeviceCommand,
    },

    /// A job moved to a new state
    JobStateChanged {
        /// Job identifier
        id: JobId,
        /// New state
        state: JobState,
    },

    /// A job reached its terminal outcome
    JobCompleted {
        /// Job identifier
        id: JobId,
        /// Outcome delivered to the caller
        outcome: JobOutcome,
    },

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------
    /// A scan started
    ScanStarted {
        /// Number of candidate ports
        ports: usize,
    },

    /// A scan finished and the registry was replaced
    ScanCompleted {
        /// Scan results
        report: ScanReport,
    },

    /// A scan could not run
    ScanFailed {
        /// Error message
        message: String,
    },
}

impl DispatchEvent {
    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DispatchEvent::JobQueued { id, .. }
            | DispatchEvent::JobStateChanged { id, .. }
            | DispatchEvent::JobCompleted { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Check if this is a discovery event
    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            DispatchEvent::ScanStarted { .. }
                | DispatchEvent::ScanCompleted { .. }
                | DispatchEvent::ScanFailed { .. }
        )
    }
}

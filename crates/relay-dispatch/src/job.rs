//! Command jobs and their outcomes

use std::fmt;

use relay_detect::{Closing, TransactionState};
use relay_protocol::DeviceCommand;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tokio::sync::oneshot;

use crate::error::DispatchError;

/// Unique, monotonically increasing job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job
///
/// `Queued -> Opening -> AwaitingResponse -> Closing(..) -> Done`, or
/// `Queued -> Done` when the device is not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the queue
    Queued,
    /// Opening the target port
    Opening,
    /// Command written, waiting for the reply line
    AwaitingResponse,
    /// Port is being closed
    Closing(Closing),
    /// Terminal; the completion sink has fired or is about to
    Done,
}

impl From<TransactionState> for JobState {
    fn from(state: TransactionState) -> Self {
        match state {
            TransactionState::Opening => JobState::Opening,
            TransactionState::AwaitingResponse => JobState::AwaitingResponse,
            TransactionState::Closing(c) => JobState::Closing(c),
            TransactionState::Closed => JobState::Done,
        }
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// First reply line, trimmed
    Ok(String),
    /// Open failure or transaction fault
    Error(String),
    /// No reply (or no open) before the deadline
    Timeout,
    /// Identifier not in the registry; no port was touched
    UnrecognizedDevice,
}

impl JobOutcome {
    /// Wire status string
    pub fn status(&self) -> &'static str {
        match self {
            JobOutcome::Ok(_) => "ok",
            JobOutcome::Error(_) => "error",
            JobOutcome::Timeout => "timeout",
            JobOutcome::UnrecognizedDevice => "unrecognized-device",
        }
    }

    /// Reply text (empty unless the job succeeded)
    pub fn response(&self) -> &str {
        match self {
            JobOutcome::Ok(text) => text,
            _ => "",
        }
    }

    /// Check if the job got a reply
    pub fn is_ok(&self) -> bool {
        matches!(self, JobOutcome::Ok(_))
    }

    /// Encode as the `{"status": .., "response": ..}` body returned to callers
    ///
    /// Embedded quotes in the reply are escaped by the JSON encoder.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"status": "{}", "response": ""}}"#, self.status())
        })
    }
}

impl From<DispatchError> for JobOutcome {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnrecognizedDevice(_) => JobOutcome::UnrecognizedDevice,
            e if e.is_timeout() => JobOutcome::Timeout,
            e => JobOutcome::Error(e.to_string()),
        }
    }
}

impl Serialize for JobOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let reason = match self {
            JobOutcome::Error(reason) => Some(reason.as_str()),
            _ => None,
        };

        let mut body = serializer.serialize_struct("JobOutcome", 2 + reason.is_some() as usize)?;
        body.serialize_field("status", self.status())?;
        body.serialize_field("response", self.response())?;
        if let Some(reason) = reason {
            body.serialize_field("error", reason)?;
        }
        body.end()
    }
}

/// A queued unit of work
#[derive(Debug)]
pub struct CommandJob {
    /// Job identifier
    pub id: JobId,
    /// Registry key as given by the caller
    pub device: String,
    /// Command to send
    pub command: DeviceCommand,
    /// Completion sink (absent for fire-and-forget)
    pub reply: Option<oneshot::Sender<JobOutcome>>,
}

impl CommandJob {
    /// Create a job whose outcome is delivered on `reply`
    pub fn new(
        id: JobId,
        device: impl Into<String>,
        command: DeviceCommand,
        reply: oneshot::Sender<JobOutcome>,
    ) -> Self {
        Self {
            id,
            device: device.into(),
            command,
            reply: Some(reply),
        }
    }

    /// Create a fire-and-forget job
    pub fn detached(id: JobId, device: impl Into<String>, command: DeviceCommand) -> Self {
        Self {
            id,
            device: device.into(),
            command,
            reply: None,
        }
    }

    /// Deliver the outcome, consuming the job
    ///
    /// A caller that stopped waiting is not an error.
    pub fn complete(self, outcome: JobOutcome) {
        if let Some(reply) = self.reply {
            let _ = reply.send(outcome);
        }
    }
}

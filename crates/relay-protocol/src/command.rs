//! Device commands
//!
//! Commands are short ASCII tokens. The firmware dispatches on the first
//! character, so anything the lab has not named is still carried through
//! verbatim as [`DeviceCommand::Raw`]. Payloads from callers are written to
//! the port exactly as given; [`DeviceCommand::ClockSync`] is only built by
//! the host itself.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ParseError;
use crate::LINE_TERMINATOR;

/// Maximum command length accepted from callers
pub const MAX_COMMAND_LEN: usize = 128;

/// A command sent to a controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Greeting probe: `h`
    Greeting,
    /// Clock synchronization: `t1700000000`
    ClockSync {
        /// Unix epoch seconds
        epoch_secs: u64,
    },
    /// Switch all relays on: `+`
    RelaysOn,
    /// Switch all relays off: `-`
    RelaysOff,
    /// Status query: `s`
    Status,
    /// Any other command, passed through unchanged
    Raw(String),
}

impl DeviceCommand {
    /// Parse a command payload (without terminator)
    ///
    /// The result always encodes back to `payload` plus the terminator.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        if payload.is_empty() {
            return Err(ParseError::EmptyCommand);
        }
        if payload.len() > MAX_COMMAND_LEN {
            return Err(ParseError::CommandTooLong { len: payload.len() });
        }
        if payload.contains(['\n', '\r']) {
            return Err(ParseError::EmbeddedTerminator(payload.to_string()));
        }

        match payload {
            "h" => Ok(DeviceCommand::Greeting),
            "+" => Ok(DeviceCommand::RelaysOn),
            "-" => Ok(DeviceCommand::RelaysOff),
            "s" => Ok(DeviceCommand::Status),
            _ => Ok(DeviceCommand::Raw(payload.to_string())),
        }
    }

    /// Epoch seconds carried by a clock synchronization payload
    ///
    /// Recognizes both host-built [`DeviceCommand::ClockSync`] commands and
    /// `t<digits>` payloads passed through from callers.
    pub fn clock_sync_secs(&self) -> Option<u64> {
        match self {
            DeviceCommand::ClockSync { epoch_secs } => Some(*epoch_secs),
            DeviceCommand::Raw(payload) => {
                let digits = payload.strip_prefix('t')?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()
            }
            _ => None,
        }
    }

    /// Clock synchronization command carrying the host's current time
    pub fn clock_sync_now() -> Self {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        DeviceCommand::ClockSync { epoch_secs }
    }

    /// The payload as sent on the wire, without terminator
    pub fn payload(&self) -> String {
        match self {
            DeviceCommand::Greeting => "h".to_string(),
            DeviceCommand::ClockSync { epoch_secs } => format!("t{epoch_secs}"),
            DeviceCommand::RelaysOn => "+".to_string(),
            DeviceCommand::RelaysOff => "-".to_string(),
            DeviceCommand::Status => "s".to_string(),
            DeviceCommand::Raw(s) => s.clone(),
        }
    }

    /// Encode this command to its wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.payload().into_bytes();
        bytes.push(LINE_TERMINATOR);
        bytes
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload())
    }
}

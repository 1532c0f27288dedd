//! Device identity and greeting classification
//!
//! Controllers answer the `h` greeting with a human-readable banner. The
//! banner is the only identity information the firmware exposes, so the
//! logical identifier is derived from it:
//!
//! - `Power Relay Controller <n>` becomes `POWER_RELAY_<n>`
//! - `CableFlysim Controller` becomes `CABLEFLYSIM`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Banner marker emitted by power relay firmware (note the trailing space)
pub const POWER_RELAY_MARKER: &str = "Power Relay Controller ";

/// Banner marker emitted by the cable flysim firmware
pub const CABLEFLYSIM_MARKER: &str = "CableFlysim Controller";

/// Registry key prefix for power relays
pub const POWER_RELAY_PREFIX: &str = "POWER_RELAY_";

/// Registry key for the cable flysim controller
pub const CABLEFLYSIM_KEY: &str = "CABLEFLYSIM";

/// Kind of controller behind a logical identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Mains power relay bank
    PowerRelay,
    /// Cable robot flight simulator
    CableFlysim,
}

impl DeviceKind {
    /// Returns a human-readable name for the device kind
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::PowerRelay => "Power Relay Controller",
            DeviceKind::CableFlysim => "CableFlysim Controller",
        }
    }
}

/// Logical device identifier used as the registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceId {
    /// A power relay with the suffix reported in its banner
    PowerRelay(String),
    /// The single cable flysim controller
    CableFlysim,
}

impl DeviceId {
    /// Create a power relay identifier from its banner suffix
    pub fn power_relay(suffix: impl Into<String>) -> Self {
        DeviceId::PowerRelay(suffix.into())
    }

    /// Get the kind of controller this identifier refers to
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceId::PowerRelay(_) => DeviceKind::PowerRelay,
            DeviceId::CableFlysim => DeviceKind::CableFlysim,
        }
    }

    /// Check if this is a power relay identifier
    pub fn is_power_relay(&self) -> bool {
        matches!(self, DeviceId::PowerRelay(_))
    }

    /// The banner this device answers the greeting with
    pub fn banner(&self) -> String {
        match self {
            DeviceId::PowerRelay(suffix) => format!("{POWER_RELAY_MARKER}{suffix}"),
            DeviceId::CableFlysim => CABLEFLYSIM_MARKER.to_string(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::PowerRelay(suffix) => write!(f, "{POWER_RELAY_PREFIX}{suffix}"),
            DeviceId::CableFlysim => f.write_str(CABLEFLYSIM_KEY),
        }
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == CABLEFLYSIM_KEY {
            return Ok(DeviceId::CableFlysim);
        }
        match s.strip_prefix(POWER_RELAY_PREFIX) {
            Some(suffix) if !suffix.is_empty() => Ok(DeviceId::PowerRelay(suffix.to_string())),
            _ => Err(ParseError::UnknownDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// Classify a greeting reply line
///
/// Returns `None` for anything that is not a recognized controller banner,
/// including a power relay banner with no suffix.
pub fn classify_greeting(line: &str) -> Option<DeviceId> {
    if let Some(idx) = line.find(POWER_RELAY_MARKER) {
        let suffix = line[idx + POWER_RELAY_MARKER.len()..].trim();
        if suffix.is_empty() {
            return None;
        }
        return Some(DeviceId::PowerRelay(suffix.to_string()));
    }

    if line.contains(CABLEFLYSIM_MARKER) {
        return Some(DeviceId::CableFlysim);
    }

    None
}

//! Status replies
//!
//! The `s` command is answered with a single-line JSON object. Replies are
//! parsed strictly: a reply with a trailing comma or any other malformation
//! is an error, not something to patch up.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Parsed status reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Per-relay state, `1` for on
    #[serde(default)]
    pub state: Vec<u8>,
    /// Device clock (unix seconds), if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    /// Any other fields the firmware reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Summary of how many relays are switched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelaySummary {
    /// No relay is on (or the device has none)
    None,
    /// At least one, but not every relay is on
    Some,
    /// Every relay is on
    All,
}

impl DeviceStatus {
    /// Parse a status reply line as strict JSON
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        serde_json::from_str(line.trim()).map_err(|e| ParseError::InvalidStatus(e.to_string()))
    }

    /// Encode this status as a single JSON line (without terminator)
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Summarize the relay states
    pub fn relays_on(&self) -> RelaySummary {
        if !self.state.is_empty() && self.state.iter().all(|&s| s == 1) {
            RelaySummary::All
        } else if self.state.iter().any(|&s| s == 1) {
            RelaySummary::Some
        } else {
            RelaySummary::None
        }
    }
}

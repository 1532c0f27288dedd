//! Simulated port configuration
//!
//! These types are embedded in the server settings file so simulation mode
//! can be set up without code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in a simulated port layout
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Two entries name the same port
    #[error("simulated port {0} is configured more than once")]
    DuplicatePort(String),

    /// A power relay entry has no banner suffix
    #[error("simulated power relay on {0} has an empty suffix")]
    EmptySuffix(String),
}

/// What a simulated port is connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimDeviceKind {
    /// Power relay controller
    PowerRelay {
        /// Banner suffix, e.g. `1` for `POWER_RELAY_1`
        suffix: String,
        /// Number of relays on the board
        #[serde(default = "default_relay_count")]
        relays: usize,
    },
    /// Cable flysim controller
    Cableflysim,
    /// Port that opens but never answers
    Silent,
    /// Port whose opens always fail
    Unopenable,
    /// Port whose open never returns, like a wedged driver
    HangOpen,
}

fn default_relay_count() -> usize {
    4
}

/// One simulated port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimPortConfig {
    /// Port name as it would be enumerated
    pub port: String,
    /// Device attached to the port
    #[serde(flatten)]
    pub kind: SimDeviceKind,
    /// Delay before each reply in milliseconds
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reply_delay_ms: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl SimPortConfig {
    /// Create a port entry with no reply delay
    pub fn new(port: impl Into<String>, kind: SimDeviceKind) -> Self {
        Self {
            port: port.into(),
            kind,
            reply_delay_ms: 0,
        }
    }

    /// A small bench: two power relays, the cable flysim and one dead port
    pub fn default_bench() -> Vec<Self> {
        vec![
            Self::new("COM1", SimDeviceKind::Silent),
            Self::new(
                "COM3",
                SimDeviceKind::PowerRelay {
                    suffix: "1".to_string(),
                    relays: default_relay_count(),
                },
            ),
            Self::new(
                "COM4",
                SimDeviceKind::PowerRelay {
                    suffix: "2".to_string(),
                    relays: default_relay_count(),
                },
            ),
            Self::new("COM5", SimDeviceKind::Cableflysim),
        ]
    }
}

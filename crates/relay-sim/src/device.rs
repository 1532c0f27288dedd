//! Virtual controller firmware
//!
//! Provides simulated relay and cable flysim controllers that answer
//! command lines the way the real firmware does.

use std::time::Instant;

use relay_protocol::{DeviceCommand, DeviceId, DeviceStatus};
use tracing::debug;

/// Reply for commands that change state
pub const ACK: &str = "OK";

/// Reply from a power relay for a command it does not know
pub const UNKNOWN_COMMAND: &str = "ERR unknown command";

/// A simulated controller
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    /// Identity announced in the greeting banner
    id: DeviceId,
    /// Relay states, `1` for on (empty for a cable flysim)
    relays: Vec<u8>,
    /// Epoch seconds from the last clock sync and when it arrived
    clock: Option<(u64, Instant)>,
    /// Number of command lines handled
    commands_handled: u64,
}

impl VirtualDevice {
    /// Create a power relay controller with `relay_count` relays, all off
    pub fn power_relay(suffix: impl Into<String>, relay_count: usize) -> Self {
        Self::new(DeviceId::power_relay(suffix), relay_count)
    }

    /// Create a cable flysim controller
    pub fn cableflysim() -> Self {
        Self::new(DeviceId::CableFlysim, 0)
    }

    fn new(id: DeviceId, relay_count: usize) -> Self {
        Self {
            id,
            relays: vec![0; relay_count],
            clock: None,
            commands_handled: 0,
        }
    }

    /// Get the device identity
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Get the relay states
    pub fn relays(&self) -> &[u8] {
        &self.relays
    }

    /// Current device clock in epoch seconds, if it has been synchronized
    pub fn clock(&self) -> Option<u64> {
        self.clock
            .map(|(epoch, at)| epoch.saturating_add(at.elapsed().as_secs()))
    }

    /// Number of command lines handled so far
    pub fn commands_handled(&self) -> u64 {
        self.commands_handled
    }

    /// Current status as reported by the `s` command
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.relays.clone(),
            time: self.clock(),
            extra: Default::default(),
        }
    }

    /// Handle one command line (without terminator) and return the reply line
    pub fn process_line(&mut self, line: &str) -> String {
        self.commands_handled += 1;

        let command = match DeviceCommand::parse(line.trim_end_matches('\r')) {
            Ok(command) => command,
            Err(e) => {
                debug!("{} rejected {:?}: {}", self.id, line, e);
                return UNKNOWN_COMMAND.to_string();
            }
        };

        if let Some(epoch_secs) = command.clock_sync_secs() {
            self.clock = Some((epoch_secs, Instant::now()));
            return ACK.to_string();
        }

        match &command {
            DeviceCommand::Greeting => self.id.banner(),
            DeviceCommand::RelaysOn => self.set_all(1),
            DeviceCommand::RelaysOff => self.set_all(0),
            DeviceCommand::Status => self.status().to_line(),
            DeviceCommand::ClockSync { .. } | DeviceCommand::Raw(_) => {
                if self.id.is_power_relay() {
                    UNKNOWN_COMMAND.to_string()
                } else {
                    format!("{ACK} {command}")
                }
            }
        }
    }

    fn set_all(&mut self, value: u8) -> String {
        if self.relays.is_empty() {
            return UNKNOWN_COMMAND.to_string();
        }
        self.relays.iter_mut().for_each(|r| *r = value);
        ACK.to_string()
    }
}

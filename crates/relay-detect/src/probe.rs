//! Greeting probes for controller identification
//!
//! This module sends the `h` greeting to a serial port and classifies the
//! banner line the firmware answers with.

use std::time::Duration;

use relay_protocol::{classify_greeting, DeviceCommand, DeviceId, DEFAULT_BAUD_RATE};
use tracing::{debug, info};

use crate::error::DetectError;
use crate::transaction::{execute_transaction, TransactionConfig};
use crate::transport::SerialBackend;

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Baud rate to open each candidate at
    pub baud_rate: u32,
    /// Deadline for the platform open call
    pub open_timeout: Duration,
    /// Timeout waiting for the greeting reply
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout: Duration::from_millis(1000),
            timeout: Duration::from_millis(750),
        }
    }
}

impl ProbeConfig {
    fn transaction(&self) -> TransactionConfig {
        TransactionConfig {
            baud_rate: self.baud_rate,
            open_timeout: self.open_timeout,
            response_timeout: self.timeout,
        }
    }
}

/// Controller prober
#[derive(Debug, Clone, Default)]
pub struct DeviceProber {
    config: ProbeConfig,
}

impl DeviceProber {
    /// Create a new prober with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a prober with custom configuration
    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Get the probe configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe one port
    ///
    /// Returns `Ok(None)` when the port answered with something that is not
    /// a controller banner. Open failures and silence are errors so the
    /// caller can log them, but they are never fatal to a scan.
    pub async fn probe(
        &self,
        backend: &dyn SerialBackend,
        port: &str,
    ) -> Result<Option<DeviceId>, DetectError> {
        debug!("Probing {} at {} baud", port, self.config.baud_rate);

        let line = execute_transaction(
            backend,
            port,
            &DeviceCommand::Greeting,
            &self.config.transaction(),
            |_| {},
        )
        .await?;

        debug!("Received response from {}: {:?}", port, line);

        match classify_greeting(&line) {
            Some(id) => {
                info!("Identified {} ({}) on {}", id, id.kind().name(), port);
                Ok(Some(id))
            }
            None => {
                debug!("{} answered with an unrecognized banner", port);
                Ok(None)
            }
        }
    }
}

//! Serial port scanner
//!
//! This module provides serial port enumeration and the sequential greeting
//! scan that discovers controllers. Ports are probed strictly one after
//! another in enumeration order, each one closed before the next is opened.

use relay_protocol::DeviceId;
use serde::Serialize;
use serialport::SerialPortType;
use tracing::{debug, info, warn};

use crate::error::DetectError;
use crate::probe::{DeviceProber, ProbeConfig};
use crate::transport::SerialBackend;

/// Information about a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// Create from serialport crate's port info
    pub(crate) fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self::named(name),
        }
    }

    /// Port info with only a name
    pub fn named(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

/// A controller found during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Logical identifier derived from the banner
    pub id: DeviceId,
    /// Port the controller answered on
    pub port: String,
}

/// Outcome of one full scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Number of candidate ports probed
    pub tried: usize,
    /// Number of ports that answered with a controller banner
    pub recognized: usize,
    /// Recognized controllers, in enumeration order
    pub devices: Vec<DiscoveredDevice>,
}

/// Serial port scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Skip ports matching these patterns
    pub skip_patterns: Vec<String>,
    /// Greeting probe settings
    pub probe: ProbeConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
            ],
            probe: ProbeConfig::default(),
        }
    }
}

/// Serial port scanner
pub struct PortScanner {
    config: ScannerConfig,
    prober: DeviceProber,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::with_config(ScannerConfig::default())
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        let prober = DeviceProber::with_config(config.probe.clone());
        Self { config, prober }
    }

    /// Get the scanner configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Enumerate all ports the backend can see, minus skipped patterns
    pub fn enumerate_ports(
        &self,
        backend: &dyn SerialBackend,
    ) -> Result<Vec<SerialPortInfo>, DetectError> {
        info!("Enumerating serial ports...");
        let result: Vec<_> = backend
            .list_ports()?
            .into_iter()
            .filter(|p| !self.should_skip_port(p))
            .collect();

        if result.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                let desc = port.product.as_deref().unwrap_or("Unknown");
                info!("  {} - {}", port.port, desc);
            }
        }

        Ok(result)
    }

    /// Probe every candidate port in order
    ///
    /// Per-port failures (open errors, silence, unknown banners) only exclude
    /// that port. Total duration is bounded by the probe timeout times the
    /// number of ports.
    pub async fn scan(&self, backend: &dyn SerialBackend, ports: &[SerialPortInfo]) -> ScanReport {
        info!("Searching {} port(s) for controllers", ports.len());
        let mut report = ScanReport::default();

        for (i, candidate) in ports.iter().enumerate() {
            if self.should_skip_port(candidate) {
                debug!("Skipping port {} ({})", i, candidate.port);
                continue;
            }

            debug!("Trying port {} ({})", i, candidate.port);
            report.tried += 1;

            match self.prober.probe(backend, &candidate.port).await {
                Ok(Some(id)) => {
                    report.recognized += 1;
                    report.devices.push(DiscoveredDevice {
                        id,
                        port: candidate.port.clone(),
                    });
                }
                Ok(None) => {}
                Err(e) if e.is_timeout() => debug!("Port {} timed out: {}", candidate.port, e),
                Err(e) => warn!("Error probing port {}: {}", candidate.port, e),
            }
        }

        info!(
            "Finished port discovery: {} tried, {} recognized",
            report.tried, report.recognized
        );
        report
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        for pattern in &self.config.skip_patterns {
            if port.port.contains(pattern) {
                return true;
            }
        }
        false
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, ScriptedBackend};
    use serialport::UsbPortInfo;
    use std::time::Duration;

    #[test]
    fn test_serial_port_info_from_usb() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: Some("75735303".to_string()),
            manufacturer: Some("Arduino (www.arduino.cc)".to_string()),
            product: Some("Uno".to_string()),
        });

        let info = SerialPortInfo::from_serialport("/dev/ttyACM0".to_string(), &usb_info);

        assert_eq!(info.vid, Some(0x2341));
        assert_eq!(info.pid, Some(0x0043));
        assert_eq!(info.product.as_deref(), Some("Uno"));
    }

    fn ports(names: &[&str]) -> Vec<SerialPortInfo> {
        names.iter().map(|n| SerialPortInfo::named(*n)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_classifies_and_skips_failures() {
        let backend = ScriptedBackend::new()
            .with("COM1", Behavior::FailOpen)
            .with("COM2", Behavior::Reply("Power Relay Controller 7".into()))
            .with("COM3", Behavior::Silent)
            .with("COM4", Behavior::Reply("CableFlysim Controller".into()))
            .with("COM5", Behavior::Reply("hello".into()));

        let report = PortScanner::new()
            .scan(&backend, &ports(&["COM1", "COM2", "COM3", "COM4", "COM5"]))
            .await;

        assert_eq!(report.tried, 5);
        assert_eq!(report.recognized, 2);
        assert_eq!(
            report.devices,
            vec![
                DiscoveredDevice {
                    id: DeviceId::power_relay("7"),
                    port: "COM2".into()
                },
                DiscoveredDevice {
                    id: DeviceId::CableFlysim,
                    port: "COM4".into()
                },
            ]
        );
        assert_eq!(backend.open_now(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_duration_is_timeout_per_silent_port() {
        let backend = ScriptedBackend::new()
            .with("A", Behavior::Silent)
            .with("B", Behavior::Silent)
            .with("C", Behavior::Silent);
        let start = tokio::time::Instant::now();

        let report = PortScanner::new().scan(&backend, &ports(&["A", "B", "C"])).await;

        assert_eq!(report.recognized, 0);
        assert_eq!(start.elapsed(), Duration::from_millis(3 * 750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_skips_configured_patterns() {
        let backend = ScriptedBackend::new()
            .with("/dev/tty.Bluetooth-Incoming-Port", Behavior::Silent)
            .with("/dev/tty.usbmodem1", Behavior::Reply("Power Relay Controller 1".into()));

        let report = PortScanner::new()
            .scan(
                &backend,
                &ports(&["/dev/tty.Bluetooth-Incoming-Port", "/dev/tty.usbmodem1"]),
            )
            .await;

        assert_eq!(report.tried, 1);
        assert_eq!(backend.opens(), 1);
    }

    #[test]
    fn test_enumerate_ports_filters_skip_patterns() {
        let backend = ScriptedBackend::new()
            .with("/dev/tty.Bluetooth-Incoming-Port", Behavior::Silent)
            .with("/dev/tty.usbmodem1", Behavior::Silent);

        let ports = PortScanner::new().enumerate_ports(&backend).unwrap();

        assert_eq!(ports, vec![SerialPortInfo::named("/dev/tty.usbmodem1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_is_idempotent() {
        let backend = ScriptedBackend::new()
            .with("COM1", Behavior::Reply("Power Relay Controller 1".into()))
            .with("COM2", Behavior::Reply("Power Relay Controller 2".into()));
        let scanner = PortScanner::new();
        let candidates = ports(&["COM1", "COM2"]);

        let first = scanner.scan(&backend, &candidates).await;
        let second = scanner.scan(&backend, &candidates).await;

        assert_eq!(first, second);
    }
}

//! Lab Relay Serial Port Detection Library
//!
//! This crate provides serial port enumeration, the single-transaction
//! serial exchange used by both discovery and command dispatch, and the
//! sequential greeting scan that maps logical device identifiers to ports.
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_detect::{HardwareBackend, PortScanner};
//!
//! # async fn run() -> Result<(), relay_detect::DetectError> {
//! let backend = HardwareBackend::new();
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports(&backend)?;
//!
//! let report = scanner.scan(&backend, &ports).await;
//! for device in &report.devices {
//!     println!("{} -> {}", device.id, device.port);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;
pub mod transaction;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::DetectError;
pub use probe::{DeviceProber, ProbeConfig};
pub use scanner::{DiscoveredDevice, PortScanner, ScanReport, ScannerConfig, SerialPortInfo};
pub use transaction::{execute_transaction, Closing, TransactionConfig, TransactionState};
pub use transport::{HardwareBackend, SerialBackend, SerialIo};

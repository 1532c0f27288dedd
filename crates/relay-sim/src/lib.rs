//! Relay Controller Simulation Library
//!
//! This crate provides virtual lab controllers for exercising discovery and
//! dispatch without physical hardware. It includes:
//!
//! - **VirtualDevice**: Answers command lines like the power relay and cable
//!   flysim firmware
//! - **SimBackend**: A [`relay_detect::SerialBackend`] whose ports are
//!   virtual devices, silent ports or ports that refuse to open
//!
//! # Example
//!
//! ```rust
//! use relay_sim::{SimBackend, VirtualDevice};
//!
//! let backend = SimBackend::new()
//!     .with_device("COM3", VirtualDevice::power_relay("1", 4))
//!     .with_device("COM4", VirtualDevice::cableflysim())
//!     .with_silent_port("COM5");
//!
//! assert_eq!(backend.open_count(), 0);
//! ```

pub mod backend;
pub mod config;
pub mod device;

pub use backend::SimBackend;
pub use config::{SimDeviceKind, SimError, SimPortConfig};
pub use device::VirtualDevice;

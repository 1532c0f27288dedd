//! Lab Relay Protocol Library
//!
//! This crate provides the wire vocabulary shared by the port scanner and
//! the command dispatcher for the lab's microcontroller devices:
//!
//! - **Power Relay Controller**: switches a bank of mains relays
//! - **CableFlysim Controller**: drives the cable robot flight simulator
//!
//! # Framing
//!
//! Both devices speak a line-oriented ASCII protocol. Every command is a
//! short token terminated by `\n`, and every reply is a single `\n`
//! terminated line:
//!
//! - `h` - greeting, answered with the controller identity
//! - `t<epoch>` - clock synchronization (unix seconds)
//! - `+` / `-` - all relays on / off
//! - `s` - status, answered with a JSON object
//!
//! # Example
//!
//! ```rust
//! use relay_protocol::{classify_greeting, DeviceId, LineCodec};
//!
//! let mut codec = LineCodec::new();
//! codec.push_bytes(b"Power Relay Controller 7\r\n");
//!
//! let line = codec.next_line().unwrap();
//! assert_eq!(classify_greeting(&line), Some(DeviceId::power_relay("7")));
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod identity;
pub mod status;

pub use codec::LineCodec;
pub use command::DeviceCommand;
pub use error::ParseError;
pub use identity::{classify_greeting, DeviceId, DeviceKind};
pub use status::{DeviceStatus, RelaySummary};

/// Baud rate every controller firmware is flashed with
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Line terminator used in both directions
pub const LINE_TERMINATOR: u8 = b'\n';

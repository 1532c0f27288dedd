//! Error types for the device line protocol

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line exceeded the codec's buffer limit without a terminator
    #[error("line too long: {len} bytes without terminator")]
    LineTooLong { len: usize },

    /// Logical device identifier is not one the lab knows about
    #[error("unknown device identifier: {0}")]
    UnknownDevice(String),

    /// Empty command payload
    #[error("empty command")]
    EmptyCommand,

    /// Command payload is longer than any controller accepts
    #[error("command too long: {len} bytes")]
    CommandTooLong { len: usize },

    /// Command payload contains a line terminator
    #[error("command contains a line terminator: {0:?}")]
    EmbeddedTerminator(String),

    /// Status reply is not strict JSON
    #[error("invalid status JSON: {0}")]
    InvalidStatus(String),
}

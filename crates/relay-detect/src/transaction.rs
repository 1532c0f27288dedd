//! Single serial transaction
//!
//! Every interaction with a controller, greeting probe or dispatched
//! command, is one transaction: open the port, write one command line, wait
//! for one reply line, close the port. The transaction walks an explicit
//! state machine:
//!
//! ```text
//! Opening -> AwaitingResponse -> Closing(Ok | Timeout | Error) -> Closed
//!    |                                                             ^
//!    +-------------------- open failed / open timed out -----------+
//! ```
//!
//! Each suspension point races a single deadline. Whichever side loses the
//! race is dropped, so a reply that arrives after the deadline is never
//! observed and the port is always closed before the outcome is returned.

use std::time::Duration;

use relay_protocol::{DeviceCommand, LineCodec, DEFAULT_BAUD_RATE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

use crate::error::DetectError;
use crate::transport::{SerialBackend, SerialIo};

/// How a transaction that reached an open port is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closing {
    /// A reply line was received
    Ok,
    /// No reply before the deadline
    Timeout,
    /// Write or read failed
    Error,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for the platform open call
    Opening,
    /// Command written, waiting for the reply line
    AwaitingResponse,
    /// Port is being closed
    Closing(Closing),
    /// Port is closed (or was never opened)
    Closed,
}

/// Timing and line settings for a transaction
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Baud rate to open the port at
    pub baud_rate: u32,
    /// Deadline for the platform open call
    pub open_timeout: Duration,
    /// Deadline for write plus the first reply line
    pub response_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout: Duration::from_millis(1000),
            response_timeout: Duration::from_millis(3000),
        }
    }
}

/// Run one transaction against `port`
///
/// `on_state` is called on every state transition, in order. Returns the
/// first reply line with its terminator removed (not otherwise trimmed).
pub async fn execute_transaction<F>(
    backend: &dyn SerialBackend,
    port: &str,
    command: &DeviceCommand,
    config: &TransactionConfig,
    mut on_state: F,
) -> Result<String, DetectError>
where
    F: FnMut(TransactionState),
{
    on_state(TransactionState::Opening);
    trace!("{}: opening at {} baud", port, config.baud_rate);

    let mut stream = match timeout(config.open_timeout, backend.open(port, config.baud_rate)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            on_state(TransactionState::Closed);
            return Err(DetectError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            on_state(TransactionState::Closed);
            return Err(DetectError::OpenTimeout {
                port: port.to_string(),
                timeout_ms: config.open_timeout.as_millis() as u64,
            });
        }
    };

    on_state(TransactionState::AwaitingResponse);
    trace!("{}: sending {:?}", port, command.payload());

    let result = match timeout(config.response_timeout, exchange(&mut *stream, command)).await {
        Ok(Ok(line)) => Ok(line),
        Ok(Err(e)) => Err(DetectError::IoError {
            port: port.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(DetectError::ResponseTimeout {
            port: port.to_string(),
            timeout_ms: config.response_timeout.as_millis() as u64,
        }),
    };

    let closing = match &result {
        Ok(_) => Closing::Ok,
        Err(e) if e.is_timeout() => Closing::Timeout,
        Err(_) => Closing::Error,
    };
    on_state(TransactionState::Closing(closing));
    drop(stream);
    on_state(TransactionState::Closed);
    trace!("{}: closed ({:?})", port, closing);

    result
}

/// Write the command and read until the first complete line
async fn exchange(stream: &mut dyn SerialIo, command: &DeviceCommand) -> std::io::Result<String> {
    stream.write_all(&command.encode()).await?;
    stream.flush().await?;

    let mut codec = LineCodec::new();
    let mut buf = [0u8; 256];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "port closed before a reply line",
            ));
        }
        codec.push_bytes(&buf[..n]);
        if let Some(line) = codec.next_line() {
            return Ok(line);
        }
    }
}

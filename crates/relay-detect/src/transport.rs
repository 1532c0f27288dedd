//! Serial backends
//!
//! Serial transactions never hold a port beyond a single exchange, so the
//! scanner and the dispatcher both go through a [`SerialBackend`] that lists
//! ports and hands out a fresh stream per transaction. Dropping the stream
//! closes the port.
//!
//! Real hardware uses [`HardwareBackend`]. Tests and simulation mode plug in
//! a backend built on `tokio::io::duplex()` streams.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serialport::available_ports;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::error::DetectError;
use crate::scanner::SerialPortInfo;

/// An open, exclusively-owned serial stream
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Source of serial ports
#[async_trait]
pub trait SerialBackend: Send + Sync {
    /// List the ports currently visible to this backend
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError>;

    /// Open `port` at `baud_rate`
    ///
    /// The returned stream is owned by exactly one transaction.
    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialIo>>;
}

/// Ports whose platform open is still running on the blocking pool
#[derive(Debug, Clone, Default)]
struct PendingOpens {
    ports: Arc<Mutex<HashSet<String>>>,
}

impl PendingOpens {
    /// Mark `port` as opening; `None` while an earlier open has not returned
    fn begin(&self, port: &str) -> Option<PendingOpen> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        if !ports.insert(port.to_string()) {
            return None;
        }
        Some(PendingOpen {
            ports: Arc::clone(&self.ports),
            port: port.to_string(),
        })
    }

    #[cfg(test)]
    fn contains(&self, port: &str) -> bool {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(port)
    }
}

/// Keeps a port marked as opening until dropped
#[derive(Debug)]
struct PendingOpen {
    ports: Arc<Mutex<HashSet<String>>>,
    port: String,
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

/// Backend for real serial hardware via `serialport` and `tokio_serial`
///
/// The platform open runs on the blocking pool so a caller can abandon it
/// with a deadline. An abandoned open keeps running; if it succeeds late,
/// the stream is closed as soon as the open returns. Until then every new
/// open of that port is refused, so a port is never held twice. Opens of
/// other ports are not held back, and a driver that never returns pins one
/// blocking thread until the process exits.
#[derive(Debug, Clone, Default)]
pub struct HardwareBackend {
    pending: PendingOpens,
}

impl HardwareBackend {
    /// Create a hardware backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SerialBackend for HardwareBackend {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .collect())
    }

    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialIo>> {
        let Some(pending) = self.pending.begin(port) else {
            warn!("{}: an earlier open has not returned yet", port);
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "an earlier open of this port is still pending",
            ));
        };
        debug!("Opening {} at {} baud", port, baud_rate);

        // The stream is dropped before the mark when nobody awaits the result
        let name = port.to_string();
        let (stream, _pending) = tokio::task::spawn_blocking(move || {
            let stream = tokio_serial::new(name, baud_rate)
                .timeout(Duration::from_millis(100))
                .open_native_async();
            (stream, pending)
        })
        .await
        .map_err(|e| io::Error::other(e.to_string()))?;

        Ok(Box::new(stream?))
    }
}

//! Simulated serial backend
//!
//! [`SimBackend`] implements [`SerialBackend`] over `tokio::io::duplex()`
//! streams. Each open spawns a small task that feeds command lines to the
//! port's [`VirtualDevice`]; the device state outlives the stream, so relay
//! and clock changes persist across transactions the same way they do on
//! real firmware.
//!
//! Ports can also be configured to stay silent, to refuse opens, to hang
//! inside the open, or to answer late. The backend counts opens so tests
//! can check that at most one port is ever open.

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use relay_detect::{DetectError, SerialBackend, SerialIo, SerialPortInfo};
use relay_protocol::{DeviceId, DeviceStatus, LineCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::{debug, trace, warn};

use crate::config::{SimDeviceKind, SimError, SimPortConfig};
use crate::device::VirtualDevice;

/// Buffer size of each simulated link
const LINK_BUFFER: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What sits behind a simulated port
#[derive(Debug, Clone)]
enum PortKind {
    /// A controller
    Device(Arc<Mutex<VirtualDevice>>),
    /// Opens fine but never answers
    Silent,
    /// Every open fails
    Unopenable,
    /// Every open blocks forever
    HangOpen,
}

#[derive(Debug, Clone)]
struct SimPort {
    kind: PortKind,
    /// Device swallows commands without answering
    muted: bool,
    /// Delay before each reply
    reply_delay: Duration,
}

impl SimPort {
    fn new(kind: PortKind) -> Self {
        Self {
            kind,
            muted: false,
            reply_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct OpenCounters {
    total: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Serial backend backed by virtual devices
#[derive(Debug, Default)]
pub struct SimBackend {
    ports: Mutex<BTreeMap<String, SimPort>>,
    counters: Arc<OpenCounters>,
}

impl SimBackend {
    /// Create a backend with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from port configurations
    pub fn from_config(ports: &[SimPortConfig]) -> Result<Self, SimError> {
        let mut backend = Self::new();

        for config in ports {
            if lock(&backend.ports).contains_key(&config.port) {
                return Err(SimError::DuplicatePort(config.port.clone()));
            }

            backend = match &config.kind {
                SimDeviceKind::PowerRelay { suffix, relays } => {
                    if suffix.trim().is_empty() {
                        return Err(SimError::EmptySuffix(config.port.clone()));
                    }
                    let device = VirtualDevice::power_relay(suffix.trim(), *relays);
                    backend.with_device(&config.port, device)
                }
                SimDeviceKind::Cableflysim => {
                    backend.with_device(&config.port, VirtualDevice::cableflysim())
                }
                SimDeviceKind::Silent => backend.with_silent_port(&config.port),
                SimDeviceKind::Unopenable => backend.with_unopenable_port(&config.port),
                SimDeviceKind::HangOpen => backend.with_hanging_port(&config.port),
            };

            if config.reply_delay_ms > 0 {
                backend = backend
                    .with_reply_delay(&config.port, Duration::from_millis(config.reply_delay_ms));
            }
        }

        Ok(backend)
    }

    /// Attach a virtual device to `port`
    pub fn with_device(self, port: &str, device: VirtualDevice) -> Self {
        self.insert(port, PortKind::Device(Arc::new(Mutex::new(device))))
    }

    /// Add a port that opens but never answers
    pub fn with_silent_port(self, port: &str) -> Self {
        self.insert(port, PortKind::Silent)
    }

    /// Add a port whose opens always fail
    pub fn with_unopenable_port(self, port: &str) -> Self {
        self.insert(port, PortKind::Unopenable)
    }

    /// Add a port whose opens never complete
    pub fn with_hanging_port(self, port: &str) -> Self {
        self.insert(port, PortKind::HangOpen)
    }

    /// Delay every reply on `port`
    pub fn with_reply_delay(self, port: &str, delay: Duration) -> Self {
        self.set_reply_delay(port, delay);
        self
    }

    fn insert(self, port: &str, kind: PortKind) -> Self {
        lock(&self.ports).insert(port.to_string(), SimPort::new(kind));
        self
    }

    /// Stop (or resume) answering on `port`; affects subsequent opens
    pub fn set_silent(&self, port: &str, silent: bool) {
        if let Some(entry) = lock(&self.ports).get_mut(port) {
            entry.muted = silent;
        }
    }

    /// Change the reply delay on `port`; affects subsequent opens
    pub fn set_reply_delay(&self, port: &str, delay: Duration) {
        if let Some(entry) = lock(&self.ports).get_mut(port) {
            entry.reply_delay = delay;
        }
    }

    /// Identity of the device on `port`
    pub fn device_id(&self, port: &str) -> Option<DeviceId> {
        self.with_port_device(port, |d| d.id().clone())
    }

    /// Clock of the device on `port`, if it has been synchronized
    pub fn device_clock(&self, port: &str) -> Option<u64> {
        self.with_port_device(port, |d| d.clock()).flatten()
    }

    /// Status of the device on `port`
    pub fn device_status(&self, port: &str) -> Option<DeviceStatus> {
        self.with_port_device(port, |d| d.status())
    }

    /// Command lines handled by the device on `port`
    pub fn commands_handled(&self, port: &str) -> u64 {
        self.with_port_device(port, |d| d.commands_handled())
            .unwrap_or(0)
    }

    fn with_port_device<R>(&self, port: &str, f: impl FnOnce(&VirtualDevice) -> R) -> Option<R> {
        let device = match lock(&self.ports).get(port).map(|p| p.kind.clone()) {
            Some(PortKind::Device(device)) => device,
            _ => return None,
        };
        let device = lock(&device);
        Some(f(&device))
    }

    /// Successful opens so far
    pub fn open_count(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }

    /// Streams open right now
    pub fn currently_open(&self) -> usize {
        self.counters.current.load(Ordering::SeqCst)
    }

    /// Most streams ever open at the same time
    pub fn max_concurrent_opens(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialBackend for SimBackend {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        Ok(lock(&self.ports)
            .keys()
            .cloned()
            .map(SerialPortInfo::named)
            .collect())
    }

    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn SerialIo>> {
        let entry = lock(&self.ports).get(port).cloned();
        let entry = match entry {
            Some(entry) => entry,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{port}: no such port"),
                ))
            }
        };

        let device = match entry.kind {
            PortKind::Unopenable => {
                debug!("Refusing open of {}", port);
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "Access is denied.",
                ));
            }
            PortKind::HangOpen => {
                debug!("Open of {} hangs", port);
                return std::future::pending::<io::Result<Box<dyn SerialIo>>>().await;
            }
            PortKind::Silent => None,
            PortKind::Device(_) if entry.muted => None,
            PortKind::Device(device) => Some(device),
        };

        trace!("Opening simulated {} at {} baud", port, baud_rate);
        let (client, link) = tokio::io::duplex(LINK_BUFFER);
        tokio::spawn(run_device_link(
            link,
            port.to_string(),
            device,
            entry.reply_delay,
        ));

        let current = self.counters.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        self.counters.peak.fetch_max(current, Ordering::SeqCst);
        if current > 1 {
            warn!("{} simulated ports open at once", current);
        }

        Ok(Box::new(SimStream {
            inner: client,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Serve one open of a simulated port until the host closes it
///
/// With no device the link swallows every line.
async fn run_device_link(
    mut link: DuplexStream,
    port: String,
    device: Option<Arc<Mutex<VirtualDevice>>>,
    reply_delay: Duration,
) {
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match link.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        codec.push_bytes(&buf[..n]);

        while let Some(line) = codec.next_line() {
            let device = match &device {
                Some(device) => device,
                None => {
                    trace!("{} swallowed {:?}", port, line);
                    continue;
                }
            };

            let reply = lock(device).process_line(&line);
            trace!("{} {:?} -> {:?}", port, line, reply);

            if !reply_delay.is_zero() {
                tokio::time::sleep(reply_delay).await;
            }
            if link
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .is_err()
            {
                debug!("{} closed before the reply was written", port);
                return;
            }
        }
    }

    trace!("Simulated link {} closed", port);
}

/// Host end of a simulated port
struct SimStream {
    inner: DuplexStream,
    counters: Arc<OpenCounters>,
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.counters.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for SimStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SimStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_detect::{execute_transaction, PortScanner, TransactionConfig};
    use relay_protocol::DeviceCommand;

    fn backend() -> SimBackend {
        SimBackend::new()
            .with_device("COM3", VirtualDevice::power_relay("1", 2))
            .with_device("COM4", VirtualDevice::cableflysim())
            .with_silent_port("COM5")
            .with_unopenable_port("COM6")
    }

    async fn send(
        backend: &SimBackend,
        port: &str,
        command: DeviceCommand,
    ) -> Result<String, DetectError> {
        execute_transaction(backend, port, &command, &TransactionConfig::default(), |_| {}).await
    }

    #[tokio::test]
    async fn test_list_ports_sorted() {
        let names: Vec<_> = backend()
            .list_ports()
            .unwrap()
            .into_iter()
            .map(|p| p.port)
            .collect();
        assert_eq!(names, vec!["COM3", "COM4", "COM5", "COM6"]);
    }

    #[tokio::test]
    async fn test_state_persists_across_opens() {
        let backend = backend();

        assert_eq!(send(&backend, "COM3", DeviceCommand::RelaysOn).await.unwrap(), "OK");
        let status = send(&backend, "COM3", DeviceCommand::Status).await.unwrap();

        assert_eq!(status.trim(), r#"{"state":[1,1]}"#);
        assert_eq!(backend.open_count(), 2);
        assert_eq!(backend.currently_open(), 0);
        assert_eq!(backend.max_concurrent_opens(), 1);
        assert_eq!(backend.commands_handled("COM3"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_and_unopenable_ports() {
        let backend = backend();

        let err = send(&backend, "COM5", DeviceCommand::Greeting).await.unwrap_err();
        assert!(err.is_timeout());

        let err = send(&backend, "COM6", DeviceCommand::Greeting).await.unwrap_err();
        assert!(matches!(err, DetectError::OpenFailed { .. }));

        let err = send(&backend, "COM9", DeviceCommand::Greeting).await.unwrap_err();
        assert!(matches!(err, DetectError::OpenFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_port_hits_open_deadline() {
        let backend = backend().with_hanging_port("COM8");
        let start = tokio::time::Instant::now();

        let err = send(&backend, "COM8", DeviceCommand::Greeting).await.unwrap_err();

        assert!(matches!(err, DetectError::OpenTimeout { timeout_ms: 1000, .. }));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(backend.open_count(), 0);
        assert_eq!(backend.currently_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_device_keeps_state() {
        let backend = backend();
        backend.set_silent("COM3", true);

        let err = send(&backend, "COM3", DeviceCommand::RelaysOn).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(backend.device_status("COM3").unwrap().state, vec![0, 0]);

        backend.set_silent("COM3", false);
        assert!(send(&backend, "COM3", DeviceCommand::Status).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_misses_window() {
        let backend = backend().with_reply_delay("COM3", Duration::from_millis(5000));

        let err = send(&backend, "COM3", DeviceCommand::RelaysOn).await.unwrap_err();

        assert!(err.is_timeout());
        // The device still acted on the command
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.device_status("COM3").unwrap().state, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_finds_virtual_devices() {
        let backend = backend();
        let scanner = PortScanner::new();
        let ports = scanner.enumerate_ports(&backend).unwrap();

        let report = scanner.scan(&backend, &ports).await;

        assert_eq!(report.tried, 4);
        assert_eq!(report.recognized, 2);
        assert_eq!(backend.device_id("COM3"), Some(DeviceId::power_relay("1")));
        assert_eq!(backend.max_concurrent_opens(), 1);
    }
}

//! Scripted port backend for unit tests

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use crate::error::DetectError;
use crate::scanner::SerialPortInfo;
use crate::transport::{SerialBackend, SerialIo};

/// How a scripted port behaves
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Reply to every command line with this line
    Reply(String),
    /// Accept commands but never reply
    Silent,
    /// Close the port as soon as a command arrives
    HangUp,
    /// Fail the open call
    FailOpen,
    /// Never complete the open call
    HangOpen,
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    ports: HashMap<String, Behavior>,
    received: Arc<Mutex<HashMap<String, Vec<String>>>>,
    open_now: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, port: &str, behavior: Behavior) -> Self {
        self.ports.insert(port.to_string(), behavior);
        self
    }

    /// Command lines received on `port`, across all opens
    pub(crate) fn received(&self, port: &str) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .get(port)
            .cloned()
            .unwrap_or_default()
    }

    /// Streams currently open
    pub(crate) fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// Successful opens so far
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialBackend for ScriptedBackend {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let mut names: Vec<_> = self.ports.keys().cloned().collect();
        names.sort();
        Ok(names.into_iter().map(SerialPortInfo::named).collect())
    }

    async fn open(&self, port: &str, _baud_rate: u32) -> io::Result<Box<dyn SerialIo>> {
        let behavior = self.ports.get(port).cloned().unwrap_or(Behavior::FailOpen);

        match behavior {
            Behavior::FailOpen => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            Behavior::HangOpen => {
                return std::future::pending().await;
            }
            _ => {}
        }

        let (client, device) = tokio::io::duplex(256);
        let received = Arc::clone(&self.received);
        let port = port.to_string();
        tokio::spawn(run_scripted_device(device, port, behavior, received));

        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedStream {
            inner: client,
            open_now: Arc::clone(&self.open_now),
        }))
    }
}

async fn run_scripted_device(
    mut device: DuplexStream,
    port: String,
    behavior: Behavior,
    received: Arc<Mutex<HashMap<String, Vec<String>>>>,
) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match device.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            received
                .lock()
                .unwrap()
                .entry(port.clone())
                .or_default()
                .push(line);

            match &behavior {
                Behavior::Reply(reply) => {
                    let _ = device.write_all(format!("{reply}\n").as_bytes()).await;
                }
                Behavior::HangUp => return,
                _ => {}
            }
        }
    }
}

/// Client end that tracks how many streams are open
struct TrackedStream {
    inner: DuplexStream,
    open_now: Arc<AtomicUsize>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
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

//! Raw byte transports to the printer.
//!
//! A [`Transport`] only moves bytes; timeouts, link state and events are
//! handled one level up by [`DeviceConnection`](crate::DeviceConnection).
//!
//! # Enum Dispatch
//!
//! Native `async fn` in traits does not give us a `Send` bound on the
//! returned futures for generic callers, and the printer service runs its
//! device on a spawned task. [`AnyTransport`] provides concrete dispatch so
//! the service stays `Send` without boxing.

#![allow(async_fn_in_trait)]

use std::io;
use std::path::PathBuf;

use parkpos_core::config::TransportTarget;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::escpos::status_request;
use crate::mock::MockTransport;

/// Byte-level access to a printer.
pub trait Transport: Send {
    /// Open the underlying handle.
    async fn open(&mut self) -> io::Result<()>;

    /// Release the handle. Idempotent.
    async fn close(&mut self);

    /// Write every byte or fail.
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Send `DLE EOT n` and read the status byte back.
    ///
    /// Returns `Ok(None)` on transports that cannot read from the device.
    async fn query_status(&mut self, n: u8) -> io::Result<Option<u8>>;

    /// Human readable target, used in logs and events.
    fn describe(&self) -> String;
}

/// Raw socket printing, usually port 9100.
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Transport for TcpTransport {
    async fn open(&mut self) -> io::Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        // Receipts are small; don't let Nagle hold the tail of a job back
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.shutdown().await
        {
            debug!("Error during shutdown: {}", e);
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    async fn query_status(&mut self, n: u8) -> io::Result<Option<u8>> {
        let stream = self.stream()?;
        stream.write_all(&status_request(n)).await?;
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        Ok(Some(byte[0]))
    }

    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Raw write endpoint such as `/dev/usb/lp0`.
#[derive(Debug)]
pub struct DeviceFileTransport {
    path: PathBuf,
    file: Option<File>,
}

impl DeviceFileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl Transport for DeviceFileTransport {
    async fn open(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path).await?;
        self.file = Some(file);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush().await
        {
            debug!("Error flushing device on close: {}", e);
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        file.write_all(bytes).await?;
        file.flush().await
    }

    async fn query_status(&mut self, _n: u8) -> io::Result<Option<u8>> {
        // The printer class endpoint is write-only
        Ok(None)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Enum wrapper for transport dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    Tcp(TcpTransport),
    DeviceFile(DeviceFileTransport),
    /// Scriptable printer for development and testing.
    Mock(MockTransport),
}

impl AnyTransport {
    /// Build the transport described by the configuration.
    pub fn from_target(target: &TransportTarget) -> Self {
        match target {
            TransportTarget::Tcp { host, port } => Self::Tcp(TcpTransport::new(host.clone(), *port)),
            TransportTarget::Device { path } => {
                Self::DeviceFile(DeviceFileTransport::new(path.clone()))
            }
        }
    }
}

impl Transport for AnyTransport {
    async fn open(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(t) => t.open().await,
            Self::DeviceFile(t) => t.open().await,
            Self::Mock(t) => t.open().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Tcp(t) => t.close().await,
            Self::DeviceFile(t) => t.close().await,
            Self::Mock(t) => t.close().await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(t) => t.write_all(bytes).await,
            Self::DeviceFile(t) => t.write_all(bytes).await,
            Self::Mock(t) => t.write_all(bytes).await,
        }
    }

    async fn query_status(&mut self, n: u8) -> io::Result<Option<u8>> {
        match self {
            Self::Tcp(t) => t.query_status(n).await,
            Self::DeviceFile(t) => t.query_status(n).await,
            Self::Mock(t) => t.query_status(n).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Tcp(t) => t.describe(),
            Self::DeviceFile(t) => t.describe(),
            Self::Mock(t) => t.describe(),
        }
    }
}

impl From<MockTransport> for AnyTransport {
    fn from(mock: MockTransport) -> Self {
        Self::Mock(mock)
    }
}

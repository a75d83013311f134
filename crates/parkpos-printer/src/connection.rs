//! Link lifecycle for a single printer.
//!
//! [`DeviceConnection`] wraps a [`Transport`] with the rules the rest of the
//! printer crate relies on:
//! - `connect()` is bounded by the connect timeout and returns a typed error
//! - `send()` fails fast with [`SendError::NotConnected`] when unlinked
//! - a write that loses the link (or times out half way) closes it, so the
//!   next job starts from a fresh handshake
//! - every link transition is published as a [`HardwareEvent`]

use std::time::Duration;

use chrono::{DateTime, Utc};
use parkpos_core::{DeviceEventBus, EventPayload, HardwareEvent, PrinterConfig};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConnectError, SendError};
use crate::escpos::status;
use crate::transport::{AnyTransport, Transport};

/// Proof of an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub target: String,
    pub since: DateTime<Utc>,
}

/// Acknowledgement of a completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub bytes_written: usize,
}

/// Result of a real-time status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterHealth {
    /// No error bits set.
    Ok,

    /// Paper end sensor triggered.
    PaperOut,

    /// The printer reports an error that blocks printing.
    Fault(String),

    /// The transport cannot read status back, or the printer did not answer.
    Unknown,
}

/// A printer link owned by exactly one service.
#[derive(Debug)]
pub struct DeviceConnection<T = AnyTransport> {
    transport: T,
    target: String,
    connected: Option<Connected>,
    connect_timeout: Duration,
    send_timeout: Duration,
    probe_timeout: Duration,
    bus: DeviceEventBus,
}

impl<T: Transport> DeviceConnection<T> {
    pub fn new(transport: T, config: &PrinterConfig, bus: DeviceEventBus) -> Self {
        let target = transport.describe();
        Self {
            transport,
            target,
            connected: None,
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
            probe_timeout: config.probe_timeout(),
            bus,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Open the link. A no-op when already connected.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn connect(&mut self) -> Result<Connected, ConnectError> {
        if let Some(connected) = &self.connected {
            return Ok(connected.clone());
        }

        debug!("Connecting to printer");
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        match timeout(self.connect_timeout, self.transport.open()).await {
            Ok(Ok(())) => {
                let connected = Connected {
                    target: self.target.clone(),
                    since: Utc::now(),
                };
                self.connected = Some(connected.clone());
                info!("Printer link established");
                self.publish_link(true);
                Ok(connected)
            }
            Ok(Err(e)) => {
                // Leave the transport in a clean state for the next attempt
                self.transport.close().await;
                let err = match ConnectError::from_io(&self.target, &e) {
                    ConnectError::Timeout { .. } => ConnectError::timeout(timeout_ms),
                    other => other,
                };
                debug!(error = %err, "Printer connect failed");
                Err(err)
            }
            Err(_) => {
                self.transport.close().await;
                debug!(timeout_ms, "Printer connect timed out");
                Err(ConnectError::timeout(timeout_ms))
            }
        }
    }

    /// Close the link. A no-op when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.connected.take().is_some() {
            self.transport.close().await;
            info!(target = %self.target, "Printer link closed");
            self.publish_link(false);
        }
    }

    /// Cheap liveness probe.
    ///
    /// Asks for the printer status byte, or writes a single NUL on
    /// transports that cannot read back. A printer too busy to answer in
    /// time still counts as alive; only a broken link does not.
    pub async fn is_alive(&mut self) -> bool {
        if self.connected.is_none() {
            return false;
        }

        let probe = async {
            match self.transport.query_status(status::PRINTER).await? {
                Some(_) => Ok(()),
                None => self.transport.write_all(&[0x00]).await,
            }
        };

        match timeout(self.probe_timeout, probe).await {
            Ok(Ok(())) | Err(_) => true,
            Ok(Err(e)) => {
                if SendError::from_io(&e).drops_link() {
                    self.link_lost(&e.to_string()).await;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Write a full payload.
    #[instrument(skip(self, bytes), fields(target = %self.target, len = bytes.len()))]
    pub async fn send(&mut self, bytes: &[u8]) -> Result<Ack, SendError> {
        if self.connected.is_none() {
            return Err(SendError::NotConnected);
        }

        let timeout_ms = self.send_timeout.as_millis() as u64;
        match timeout(self.send_timeout, self.transport.write_all(bytes)).await {
            Ok(Ok(())) => {
                debug!("Payload delivered");
                Ok(Ack {
                    bytes_written: bytes.len(),
                })
            }
            Ok(Err(e)) => {
                let err = match SendError::from_io(&e) {
                    SendError::Timeout { .. } => SendError::timeout(timeout_ms),
                    other => other,
                };
                if err.drops_link() {
                    self.link_lost(&e.to_string()).await;
                }
                Err(err)
            }
            Err(_) => {
                // Part of the payload may be on the wire; resync with a new link
                self.link_lost("write timed out").await;
                Err(SendError::timeout(timeout_ms))
            }
        }
    }

    /// Query paper and error state.
    pub async fn health(&mut self) -> PrinterHealth {
        if self.connected.is_none() {
            return PrinterHealth::Unknown;
        }

        let paper = match self.query(status::PAPER).await {
            Some(byte) => byte,
            None => return PrinterHealth::Unknown,
        };
        if paper & status::PAPER_END_BITS != 0 {
            return PrinterHealth::PaperOut;
        }

        if let Some(error) = self.query(status::ERROR).await {
            if error & status::UNRECOVERABLE_BIT != 0 {
                return PrinterHealth::Fault("Error irrecuperable".to_string());
            }
            if error & status::CUTTER_ERROR_BIT != 0 {
                return PrinterHealth::Fault("Error de la cuchilla".to_string());
            }
            if error & status::AUTO_RECOVERABLE_BIT != 0 {
                return PrinterHealth::Fault("Error recuperable (tapa abierta)".to_string());
            }
        }

        match self.query(status::PRINTER).await {
            Some(byte) if byte & status::OFFLINE_BIT != 0 => {
                PrinterHealth::Fault("Impresora fuera de línea".to_string())
            }
            _ => PrinterHealth::Ok,
        }
    }

    async fn query(&mut self, n: u8) -> Option<u8> {
        match timeout(self.probe_timeout, self.transport.query_status(n)).await {
            Ok(Ok(byte)) => byte,
            Ok(Err(e)) => {
                if SendError::from_io(&e).drops_link() {
                    self.link_lost(&e.to_string()).await;
                }
                None
            }
            Err(_) => None,
        }
    }

    async fn link_lost(&mut self, reason: &str) {
        if self.connected.take().is_some() {
            self.transport.close().await;
            warn!(target = %self.target, reason, "Printer link lost");
            self.publish_link(false);
        }
    }

    fn publish_link(&self, connected: bool) {
        self.bus.publish(HardwareEvent::printer(EventPayload::LinkChanged {
            connected,
            target: self.target.clone(),
        }));
    }
}

//! Mock printer for testing and development.
//!
//! [`MockTransport`] behaves like a networked thermal printer: it refuses
//! connections while "unplugged", answers `DLE EOT` status requests, and
//! records every payload it receives. A cloneable [`MockPrinterHandle`]
//! flips those conditions from the test while the transport itself is owned
//! by the printer service.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::escpos::status;
use crate::transport::Transport;

/// Bits 1 and 4 are always set in a real-time status byte.
const STATUS_FIXED_BITS: u8 = 0x12;

#[derive(Debug)]
struct MockPrinterState {
    online: bool,
    paper_out: bool,
    fault: bool,
    open: bool,
    readback: bool,
    write_delay: Option<Duration>,
    fail_next: VecDeque<io::ErrorKind>,
    connect_attempts: u32,
    write_attempts: u32,
    jobs: Vec<Vec<u8>>,
}

impl Default for MockPrinterState {
    fn default() -> Self {
        Self {
            online: true,
            paper_out: false,
            fault: false,
            open: false,
            readback: true,
            write_delay: None,
            fail_next: VecDeque::new(),
            connect_attempts: 0,
            write_attempts: 0,
            jobs: Vec::new(),
        }
    }
}

/// Simulated printer transport.
///
/// # Examples
///
/// ```
/// use parkpos_printer::mock::MockTransport;
/// use parkpos_printer::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (mut printer, handle) = MockTransport::new();
///
/// handle.set_online(false);
/// assert!(printer.open().await.is_err());
///
/// handle.set_online(true);
/// printer.open().await.unwrap();
/// printer.write_all(b"hola").await.unwrap();
/// assert_eq!(handle.jobs(), vec![b"hola".to_vec()]);
/// # }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockPrinterState>>,
    written: Arc<Notify>,
    name: String,
}

impl MockTransport {
    /// Create an online mock printer and its control handle.
    pub fn new() -> (Self, MockPrinterHandle) {
        Self::with_name("mock://printer")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, MockPrinterHandle) {
        let state = Arc::new(Mutex::new(MockPrinterState::default()));
        let written = Arc::new(Notify::new());

        let transport = Self {
            state: Arc::clone(&state),
            written: Arc::clone(&written),
            name: name.into(),
        };
        let handle = MockPrinterHandle { state, written };

        (transport, handle)
    }
}

impl Transport for MockTransport {
    async fn open(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if !state.online {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock printer offline",
            ));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().open = false;
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let delay = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(io::ErrorKind::NotConnected.into());
            }
            if !state.online {
                state.open = false;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock printer unplugged"));
            }
            state.write_attempts += 1;
            if state.paper_out || state.fault {
                return Err(io::Error::other("mock printer not ready"));
            }
            if let Some(kind) = state.fail_next.pop_front() {
                if is_link_loss(kind) {
                    state.open = false;
                }
                return Err(io::Error::new(kind, "mock printer write failure"));
            }
            state.write_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // A lone NUL is the liveness probe of write-only transports
        if bytes != [0x00] {
            self.state.lock().jobs.push(bytes.to_vec());
            self.written.notify_waiters();
        }
        Ok(())
    }

    async fn query_status(&mut self, n: u8) -> io::Result<Option<u8>> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if !state.online {
            state.open = false;
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if !state.readback {
            return Ok(None);
        }

        let byte = match n {
            status::PRINTER if state.paper_out || state.fault => {
                STATUS_FIXED_BITS | status::OFFLINE_BIT
            }
            status::ERROR if state.fault => STATUS_FIXED_BITS | status::UNRECOVERABLE_BIT,
            status::PAPER if state.paper_out => STATUS_FIXED_BITS | status::PAPER_END_BITS,
            _ => STATUS_FIXED_BITS,
        };
        Ok(Some(byte))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

fn is_link_loss(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// Handle for controlling a [`MockTransport`].
///
/// Clone it freely; every clone controls the same printer.
#[derive(Debug, Clone)]
pub struct MockPrinterHandle {
    state: Arc<Mutex<MockPrinterState>>,
    written: Arc<Notify>,
}

impl MockPrinterHandle {
    /// Plug or unplug the printer. Unplugging breaks an open link on its
    /// next use and refuses new connections.
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    pub fn set_paper_out(&self, paper_out: bool) {
        self.state.lock().paper_out = paper_out;
    }

    /// Raise or clear an unrecoverable error (cutter jam, head overheat).
    pub fn set_fault(&self, fault: bool) {
        self.state.lock().fault = fault;
    }

    /// Behave like a write-only endpoint that cannot answer status requests.
    pub fn set_readback(&self, readback: bool) {
        self.state.lock().readback = readback;
    }

    /// Make every payload write take this long.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = Some(delay);
    }

    /// Fail the next `count` payload writes with `kind`.
    pub fn fail_next_writes(&self, count: usize, kind: io::ErrorKind) {
        let mut state = self.state.lock();
        state.fail_next.extend(std::iter::repeat_n(kind, count));
    }

    /// Payloads that reached the printer, in arrival order.
    pub fn jobs(&self) -> Vec<Vec<u8>> {
        self.state.lock().jobs.clone()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Calls to `open()`, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Payload writes tried while linked, failed ones included.
    pub fn write_attempts(&self) -> u32 {
        self.state.lock().write_attempts
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Wait until at least `count` payloads have been printed.
    pub async fn wait_for_jobs(&self, count: usize) {
        loop {
            let notified = self.written.notified();
            if self.job_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

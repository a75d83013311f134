//! Printer service: the only owner of the printer link.
//!
//! # Architecture
//!
//! ```text
//!  callers (cloned handles)            service task
//!  ┌──────────────────────┐           ┌──────────────────────────────┐
//!  │ print() ─render─► PrintQueue ◄───┤ drain loop                   │
//!  │            notify ──────────────►│   DeviceConnection ──► printer│
//!  │ test_connection() ─mpsc────────► │   reconnect / health timers  │
//!  │ get_status() ◄──────watch────────┤   status transitions ──► bus │
//!  └──────────────────────┘           └──────────────────────────────┘
//! ```
//!
//! `print()` renders and enqueues synchronously and never waits for the
//! printer. The task decides what to do from the current [`DeviceStatus`]:
//!
//! | Status                        | Task behaviour                              |
//! |-------------------------------|---------------------------------------------|
//! | `DISCONNECTED` / `CONNECTING` | try to reconnect every `reconnect_interval` |
//! | `READY` / `BUSY`              | drain the queue, probe health when idle     |
//! | `OUT_OF_CONSUMABLE` / `ERROR` | re-check health every `health_check_interval`|
//!
//! Reconnect polls keep the status at `DISCONNECTED`; `CONNECTING` is only
//! reported for the first handshake after start.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parkpos_core::{
    DeviceEventBus, DeviceStatus, EventPayload, HardwareEvent, JobId, PrinterConfig,
};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{Connected, DeviceConnection, PrinterHealth};
use crate::error::{PrinterError, Result};
use crate::queue::{DrainStop, PrintJob, PrintQueue, Priority, QueueStatus};
use crate::renderer::{DocumentKind, ReceiptFields, ReceiptRenderer, RenderedReceipt};
use crate::transport::AnyTransport;

/// Outcome of a successful [`PrinterService::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub connected: Connected,
    pub health: PrinterHealth,
}

enum Command {
    TestConnection(oneshot::Sender<Result<ConnectionReport>>),
}

#[derive(Debug)]
struct Shared {
    queue: PrintQueue,
    renderer: ReceiptRenderer,
    wake: Notify,
    cancel: CancellationToken,
}

/// Handle to a running printer service.
///
/// Cloning is cheap; every clone talks to the same task.
#[derive(Debug, Clone)]
pub struct PrinterService {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<DeviceStatus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestConnection(_) => write!(f, "TestConnection"),
        }
    }
}

impl PrinterService {
    /// Spawn the service task for the transport named in `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: PrinterConfig, bus: DeviceEventBus) -> Self {
        let transport = AnyTransport::from_target(&config.transport);
        Self::start(config, transport, bus)
    }

    /// Spawn the service task over an explicit transport.
    ///
    /// The first connection attempt starts immediately; `print()` works
    /// whether or not it succeeds.
    pub fn start(
        config: PrinterConfig,
        transport: impl Into<AnyTransport>,
        bus: DeviceEventBus,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: PrintQueue::from_config(&config),
            renderer: ReceiptRenderer::new(config.columns),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        });
        let (command_tx, command_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(DeviceStatus::Disconnected);

        let worker = Worker {
            conn: DeviceConnection::new(transport.into(), &config, bus.clone()),
            shared: Arc::clone(&shared),
            bus,
            commands: command_rx,
            status: status_tx,
            reconnect_interval: config.reconnect_interval(),
            health_interval: config.health_check_interval(),
            next_check: Instant::now(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            shared,
            commands: command_tx,
            status: status_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Validate, render and enqueue a document at its default priority.
    ///
    /// Returns as soon as the job is queued. Delivery is reported through
    /// `JobCompleted` / `JobAbandoned` events.
    pub fn print(&self, kind: DocumentKind, fields: &ReceiptFields) -> Result<PrintJob> {
        self.print_with_priority(kind, fields, kind.default_priority())
    }

    #[instrument(skip_all, fields(kind = %kind, priority = %priority))]
    pub fn print_with_priority(
        &self,
        kind: DocumentKind,
        fields: &ReceiptFields,
        priority: Priority,
    ) -> Result<PrintJob> {
        if self.shared.cancel.is_cancelled() {
            return Err(PrinterError::ServiceStopped);
        }

        let receipt = self.shared.renderer.render(kind, fields)?;
        if receipt.is_truncated() {
            debug!(fields = ?receipt.truncated_fields, "Receipt fields truncated");
        }

        let job = self
            .shared
            .queue
            .enqueue(PrintJob::new(kind, receipt.bytes, priority));
        self.shared.wake.notify_one();
        Ok(job)
    }

    /// Render without printing, to inspect truncation and substitutions.
    pub fn preview(&self, kind: DocumentKind, fields: &ReceiptFields) -> Result<RenderedReceipt> {
        Ok(self.shared.renderer.render(kind, fields)?)
    }

    /// Enqueue a fresh copy of an abandoned job.
    pub fn reprint(&self, job_id: JobId) -> Result<PrintJob> {
        if self.shared.cancel.is_cancelled() {
            return Err(PrinterError::ServiceStopped);
        }
        let job = self
            .shared
            .queue
            .requeue_abandoned(job_id)
            .ok_or_else(|| PrinterError::UnknownJob(job_id.to_string()))?;
        self.shared.wake.notify_one();
        Ok(job)
    }

    pub fn get_status(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn status_watch(&self) -> watch::Receiver<DeviceStatus> {
        self.status.clone()
    }

    /// Probe the printer now, reconnecting first if the link is down.
    pub async fn test_connection(&self) -> Result<ConnectionReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::TestConnection(tx))
            .await
            .map_err(|_| PrinterError::ServiceStopped)?;
        rx.await.map_err(|_| PrinterError::ServiceStopped)?
    }

    pub fn pending_jobs(&self) -> Vec<PrintJob> {
        self.shared.queue.pending_jobs()
    }

    pub fn abandoned_jobs(&self) -> Vec<PrintJob> {
        self.shared.queue.abandoned_jobs()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.shared.queue.peek_status()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Stop the task, close the link and wait for termination.
    ///
    /// Pending jobs stay in the queue. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            error!(error = %e, "Printer service task panicked");
            return Err(PrinterError::TaskFailed(e.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wake {
    Cancelled,
    Elapsed,
    Work,
}

enum Signal {
    Cancelled,
    Command(Option<Command>),
    Jobs,
    Elapsed,
}

struct Worker {
    conn: DeviceConnection,
    shared: Arc<Shared>,
    bus: DeviceEventBus,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<DeviceStatus>,
    reconnect_interval: Duration,
    health_interval: Duration,
    next_check: Instant,
}

impl Worker {
    async fn run(mut self) {
        info!(target = %self.conn.target(), "Printer service started");
        self.set_status(DeviceStatus::Connecting);
        self.try_connect().await;

        while !self.shared.cancel.is_cancelled() {
            match self.current() {
                DeviceStatus::Disconnected | DeviceStatus::Connecting => {
                    if self.wait(false, self.next_check).await == Wake::Elapsed {
                        self.try_connect().await;
                    }
                }
                DeviceStatus::Ready | DeviceStatus::Busy => {
                    if self.shared.queue.peek_status().pending > 0 {
                        self.drain_pass().await;
                    } else {
                        self.set_status(DeviceStatus::Ready);
                        if self.wait(true, self.next_check).await == Wake::Elapsed {
                            self.check_health().await;
                        }
                    }
                }
                DeviceStatus::OutOfConsumable | DeviceStatus::Error => {
                    if self.wait(false, self.next_check).await == Wake::Elapsed {
                        self.check_health().await;
                    }
                }
            }
        }

        let interrupted = self.shared.queue.reclaim_in_flight();
        if interrupted > 0 {
            debug!(interrupted, "Returned interrupted jobs to the queue");
        }
        self.conn.disconnect().await;
        self.set_status(DeviceStatus::Disconnected);
        info!("Printer service stopped");
    }

    fn current(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: DeviceStatus) {
        let previous = self.status.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Printer status changed");
            self.bus.publish(HardwareEvent::printer(EventPayload::StatusChanged {
                from: previous,
                to: next,
            }));
        }
    }

    fn set_disconnected(&mut self) {
        self.set_status(DeviceStatus::Disconnected);
        self.next_check = Instant::now() + self.reconnect_interval;
    }

    /// Sleep until `deadline`, serving commands meanwhile.
    async fn wait(&mut self, wake_on_jobs: bool, deadline: Instant) -> Wake {
        let signal = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Signal::Cancelled,
            command = self.commands.recv() => Signal::Command(command),
            _ = self.shared.wake.notified(), if wake_on_jobs => Signal::Jobs,
            _ = sleep_until(deadline) => Signal::Elapsed,
        };

        match signal {
            Signal::Cancelled => Wake::Cancelled,
            Signal::Command(Some(command)) => {
                self.handle(command).await;
                Wake::Work
            }
            Signal::Command(None) => {
                // Every handle is gone; nobody can print anymore
                self.shared.cancel.cancel();
                Wake::Cancelled
            }
            Signal::Jobs => Wake::Work,
            Signal::Elapsed => Wake::Elapsed,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::TestConnection(reply) => {
                // Drops a dead link so the connect below starts fresh
                self.conn.is_alive().await;
                let result = match self.conn.connect().await {
                    Ok(connected) => {
                        let health = self.conn.health().await;
                        self.apply_health(&health);
                        Ok(ConnectionReport { connected, health })
                    }
                    Err(e) => {
                        self.set_disconnected();
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn try_connect(&mut self) {
        match self.conn.connect().await {
            Ok(_) => {
                let health = self.conn.health().await;
                self.apply_health(&health);
            }
            Err(e) => {
                debug!(error = %e, "Printer not reachable");
                self.set_disconnected();
            }
        }
    }

    async fn check_health(&mut self) {
        if !self.conn.is_alive().await {
            warn!(target = %self.conn.target(), "Printer stopped answering");
            self.set_disconnected();
            return;
        }
        let health = self.conn.health().await;
        self.apply_health(&health);
    }

    fn apply_health(&mut self, health: &PrinterHealth) {
        if !self.conn.is_connected() {
            self.set_disconnected();
            return;
        }

        match health {
            PrinterHealth::Ok | PrinterHealth::Unknown => {
                if self.current() != DeviceStatus::Busy {
                    self.set_status(DeviceStatus::Ready);
                }
            }
            PrinterHealth::PaperOut => self.set_status(DeviceStatus::OutOfConsumable),
            PrinterHealth::Fault(reason) => self.set_fault(reason),
        }
        self.next_check = Instant::now() + self.health_interval;
    }

    fn set_fault(&self, reason: &str) {
        if self.current() != DeviceStatus::Error {
            warn!(reason, "Printer reported a fault");
            self.bus.publish(HardwareEvent::printer(EventPayload::DeviceError {
                message: reason.to_string(),
            }));
        }
        self.set_status(DeviceStatus::Error);
    }

    async fn drain_pass(&mut self) {
        self.set_status(DeviceStatus::Busy);

        let report = tokio::select! {
            report = self.shared.queue.drain(&mut self.conn, &self.bus) => report,
            _ = self.shared.cancel.cancelled() => return,
        };
        debug!(
            printed = report.printed,
            abandoned = report.abandoned,
            stop = ?report.stop,
            "Drain pass finished"
        );

        match report.stop {
            DrainStop::Idle => {
                self.set_status(DeviceStatus::Ready);
                self.next_check = Instant::now() + self.health_interval;
            }
            DrainStop::Disconnected => self.set_disconnected(),
            DrainStop::OutOfPaper => {
                self.set_status(DeviceStatus::OutOfConsumable);
                self.next_check = Instant::now() + self.health_interval;
            }
            DrainStop::Fault(reason) => {
                self.set_fault(&reason);
                self.next_check = Instant::now() + self.health_interval;
            }
            DrainStop::Backoff(at) => {
                // Stays BUSY; new jobs and commands are served before `at`
                let deadline = at.min(self.next_check);
                if self.wait(true, deadline).await == Wake::Elapsed
                    && Instant::now() >= self.next_check
                {
                    self.check_health().await;
                }
            }
        }
    }
}

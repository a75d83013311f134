//! Scanner service: the only owner of scanner input.
//!
//! # Architecture
//!
//! ```text
//!  callers (cloned handles)             service task
//!  ┌────────────────────────┐          ┌────────────────────────────────┐
//!  │ await_code()      ─mpsc──────────►│ owner: Idle | Scanning | Manual│
//!  │ start_manual_entry()              │   Scanning → ScanCapture       │
//!  │ manual_input()          ◄oneshot──┤   Manual   → ManualEntryFallback│
//!  │ cancel()                          │ keystroke source ──► owner     │
//!  │ get_status() / mode() ◄──watch────┤ timers: quiet period, scan     │
//!  └────────────────────────┘          │ deadline, manual idle, reopen  │
//!                                      └────────────────────────────────┘
//! ```
//!
//! Exactly one input owner exists at any instant. It is a single enum field
//! of the task, so automatic capture and manual entry cannot both be live;
//! scanner keystrokes that arrive during manual entry are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use parkpos_core::{
    DeviceEventBus, DeviceStatus, EventPayload, HardwareEvent, ScanQuality, ScanSource,
    ScannerConfig, ScannerMode,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::{CaptureEvent, CaptureSettings, ScanCapture};
use crate::error::{Result, ScanError, SourceError};
use crate::fallback::{ManualEntryFallback, ManualInput, ManualOutcome};
use crate::result::{ScanResult, Validation};
use crate::source::{AnyKeystrokeSource, KeystrokeSource};
use crate::validator::CodeValidator;

type Reply = oneshot::Sender<Result<ScanResult>>;

enum Command {
    AwaitCode { timeout: Duration, reply: Reply },
    StartManualEntry { reply: Reply },
    ManualInput(ManualInput),
    Cancel { done: oneshot::Sender<()> },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitCode { timeout, .. } => write!(f, "AwaitCode({timeout:?})"),
            Self::StartManualEntry { .. } => write!(f, "StartManualEntry"),
            Self::ManualInput(input) => write!(f, "ManualInput({input:?})"),
            Self::Cancel { .. } => write!(f, "Cancel"),
        }
    }
}

#[derive(Debug)]
struct Shared {
    validator: CodeValidator,
    cancel: CancellationToken,
}

/// Handle to a running scanner service.
///
/// Cloning is cheap; every clone talks to the same task.
#[derive(Debug, Clone)]
pub struct ScannerService {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<DeviceStatus>,
    mode: watch::Receiver<ScannerMode>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScannerService {
    /// Spawn the service task for the input named in `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: ScannerConfig, bus: DeviceEventBus) -> Self {
        let source = AnyKeystrokeSource::from_input(&config.source);
        Self::start(config, source, bus)
    }

    /// Spawn the service task over an explicit keystroke source.
    pub fn start(
        config: ScannerConfig,
        source: impl Into<AnyKeystrokeSource>,
        bus: DeviceEventBus,
    ) -> Self {
        let shared = Arc::new(Shared {
            validator: CodeValidator::new(config.symbology.clone()),
            cancel: CancellationToken::new(),
        });
        let (command_tx, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(DeviceStatus::Disconnected);
        let (mode_tx, mode_rx) = watch::channel(ScannerMode::Idle);

        let worker = Worker {
            source: source.into(),
            source_open: false,
            reopen_at: Instant::now(),
            reconnect_interval: config.reconnect_interval(),
            capture: ScanCapture::new(CaptureSettings::from_config(&config)),
            fallback: ManualEntryFallback::new(
                config.manual_entry_timeout(),
                config.max_candidate_len,
            ),
            owner: Owner::Idle,
            auto_manual: config.auto_manual_on_timeout,
            shared: Arc::clone(&shared),
            bus,
            commands: command_rx,
            status: status_tx,
            mode: mode_tx,
        };
        let task = tokio::spawn(worker.run());

        Self {
            shared,
            commands: command_tx,
            status: status_rx,
            mode: mode_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Arm automatic capture and wait for the next code.
    ///
    /// Returns [`ScanError::Timeout`] when nothing is scanned in time; the
    /// caller should then offer [`start_manual_entry`](Self::start_manual_entry).
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn await_code(&self, timeout: Duration) -> Result<ScanResult> {
        self.request(|reply| Command::AwaitCode { timeout, reply })
            .await
    }

    /// Hand input to the operator and wait for a typed code.
    ///
    /// Preempts a pending [`await_code`](Self::await_code), whose caller gets
    /// [`ScanError::Preempted`].
    pub async fn start_manual_entry(&self) -> Result<ScanResult> {
        self.request(|reply| Command::StartManualEntry { reply })
            .await
    }

    /// Forward one operator keystroke to the manual entry field.
    ///
    /// Ignored when manual entry is not active.
    pub async fn manual_input(&self, input: ManualInput) -> Result<()> {
        self.commands
            .send(Command::ManualInput(input))
            .await
            .map_err(|_| ScanError::ServiceStopped)
    }

    /// Abort whatever owns input and return to idle.
    ///
    /// Safe from any state and on a stopped service.
    pub async fn cancel(&self) {
        let (done, ack) = oneshot::channel();
        if self.commands.send(Command::Cancel { done }).await.is_ok() {
            let _ = ack.await;
        }
    }

    /// Validate a code obtained elsewhere against the configured symbology.
    pub fn validate(&self, raw: &str) -> Validation {
        self.shared.validator.validate(raw).into()
    }

    pub fn get_status(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<DeviceStatus> {
        self.status.clone()
    }

    /// Current input owner.
    pub fn mode(&self) -> ScannerMode {
        *self.mode.borrow()
    }

    pub fn mode_watch(&self) -> watch::Receiver<ScannerMode> {
        self.mode.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Stop the task, close the source and wait for termination.
    ///
    /// Pending requests fail with [`ScanError::ServiceStopped`]. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
            && e.is_panic()
        {
            error!(error = %e, "Scanner service task panicked");
            return Err(ScanError::TaskFailed(e.to_string()));
        }
        Ok(())
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<ScanResult> {
        if self.shared.cancel.is_cancelled() {
            return Err(ScanError::ServiceStopped);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ScanError::ServiceStopped)?;
        rx.await.map_err(|_| ScanError::ServiceStopped)?
    }
}

/// Who receives input right now.
#[derive(Debug)]
enum Owner {
    Idle,
    Scanning {
        reply: Reply,
        timeout: Duration,
        deadline: Instant,
    },
    /// `reply` is empty for a session opened automatically after a scan
    /// timeout that no caller has attached to yet.
    Manual { reply: Option<Reply> },
}

impl Owner {
    fn mode(&self) -> ScannerMode {
        match self {
            Self::Idle => ScannerMode::Idle,
            Self::Scanning { .. } => ScannerMode::Scanning,
            Self::Manual { .. } => ScannerMode::ManualEntry,
        }
    }
}

enum Signal {
    Cancelled,
    Command(Option<Command>),
    Key(std::result::Result<char, SourceError>),
    Timer,
}

struct Worker {
    source: AnyKeystrokeSource,
    source_open: bool,
    reopen_at: Instant,
    reconnect_interval: Duration,
    capture: ScanCapture,
    fallback: ManualEntryFallback,
    owner: Owner,
    auto_manual: bool,
    shared: Arc<Shared>,
    bus: DeviceEventBus,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<DeviceStatus>,
    mode: watch::Sender<ScannerMode>,
}

impl Worker {
    async fn run(mut self) {
        info!(source = %self.source.describe(), "Scanner service started");
        self.set_status(DeviceStatus::Connecting);
        self.try_open().await;

        while !self.shared.cancel.is_cancelled() {
            let deadline = self.next_deadline();
            let far = Instant::now() + Duration::from_secs(86_400);

            let signal = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => Signal::Cancelled,
                command = self.commands.recv() => Signal::Command(command),
                key = self.source.next_key(), if self.source_open => Signal::Key(key),
                _ = sleep_until(deadline.unwrap_or(far)), if deadline.is_some() => Signal::Timer,
            };

            match signal {
                Signal::Cancelled => break,
                Signal::Command(Some(command)) => self.handle(command),
                Signal::Command(None) => {
                    // Every handle is gone
                    self.shared.cancel.cancel();
                }
                Signal::Key(Ok(ch)) => self.on_key(ch, Instant::now()),
                Signal::Key(Err(e)) => self.source_lost(e).await,
                Signal::Timer => self.on_timer(Instant::now()).await,
            }
            self.check_exclusive();
        }

        self.capture.reset();
        self.fallback.reset();
        // Dropping the pending reply fails its caller with ServiceStopped
        self.set_owner(Owner::Idle);
        self.source.close().await;
        self.source_open = false;
        self.set_status(DeviceStatus::Disconnected);
        info!("Scanner service stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let reopen = (!self.source_open).then_some(self.reopen_at);
        let (scan, capture) = match &self.owner {
            Owner::Scanning { deadline, .. } => (Some(*deadline), self.capture.deadline()),
            _ => (None, None),
        };
        [reopen, scan, capture, self.fallback.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    fn check_exclusive(&self) {
        debug_assert!(
            !(self.capture.is_accumulating() && self.fallback.is_active()),
            "scanner capture and manual entry both own input"
        );
        match self.owner {
            Owner::Manual { .. } => debug_assert_eq!(self.capture.buffered(), 0),
            Owner::Idle | Owner::Scanning { .. } => debug_assert!(!self.fallback.is_active()),
        }
    }

    fn set_status(&self, next: DeviceStatus) {
        let previous = self.status.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Scanner status changed");
            self.bus.publish(HardwareEvent::scanner(EventPayload::StatusChanged {
                from: previous,
                to: next,
            }));
        }
    }

    fn refresh_status(&self) {
        let next = if !self.source_open {
            DeviceStatus::Disconnected
        } else if matches!(self.owner, Owner::Idle) {
            DeviceStatus::Ready
        } else {
            DeviceStatus::Busy
        };
        self.set_status(next);
    }

    /// Replace the input owner, returning the previous one.
    fn set_owner(&mut self, owner: Owner) -> Owner {
        let previous = std::mem::replace(&mut self.owner, owner);
        self.publish_mode();
        previous
    }

    /// Take the owner without publishing; the caller installs the next one.
    fn take_owner(&mut self) -> Owner {
        std::mem::replace(&mut self.owner, Owner::Idle)
    }

    fn publish_mode(&self) {
        let to = self.owner.mode();
        let from = self.mode.send_replace(to);
        if from != to {
            debug!(%from, %to, "Scanner mode changed");
            self.bus
                .publish(HardwareEvent::scanner(EventPayload::ModeChanged { from, to }));
        }
        self.refresh_status();
    }

    fn handle(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::AwaitCode { timeout, reply } => {
                let busy = match &self.owner {
                    Owner::Idle => false,
                    // The previous caller gave up waiting
                    Owner::Scanning { reply, .. } => !reply.is_closed(),
                    Owner::Manual { .. } => true,
                };
                if busy {
                    let _ = reply.send(Err(ScanError::Busy));
                    return;
                }
                self.capture.reset();
                self.set_owner(Owner::Scanning {
                    reply,
                    timeout,
                    deadline: now + timeout,
                });
            }
            Command::StartManualEntry { reply } => match self.take_owner() {
                Owner::Idle => self.activate_manual(Some(reply), now),
                Owner::Scanning { reply: scan, .. } => {
                    let dropped = self.capture.reset();
                    debug!(dropped, "Scan preempted by manual entry");
                    let _ = scan.send(Err(ScanError::Preempted));
                    self.activate_manual(Some(reply), now);
                }
                Owner::Manual { reply: current } => {
                    // Attach to a session nobody is waiting on
                    let attach = current.as_ref().is_none_or(|r| r.is_closed());
                    if attach {
                        self.set_owner(Owner::Manual { reply: Some(reply) });
                    } else {
                        self.set_owner(Owner::Manual { reply: current });
                        let _ = reply.send(Err(ScanError::Busy));
                    }
                }
            },
            Command::ManualInput(input) => {
                if !matches!(self.owner, Owner::Manual { .. }) {
                    debug!(?input, "Manual input ignored; manual entry is not active");
                    return;
                }
                if let Some(outcome) = self.fallback.input(input, now) {
                    self.finish_manual(outcome);
                }
            }
            Command::Cancel { done } => {
                self.cancel_owner();
                let _ = done.send(());
            }
        }
    }

    fn activate_manual(&mut self, reply: Option<Reply>, now: Instant) {
        self.capture.reset();
        self.fallback.reset();
        self.fallback.activate(now);
        self.set_owner(Owner::Manual { reply });
    }

    fn cancel_owner(&mut self) {
        match self.owner.mode() {
            ScannerMode::Idle => {}
            ScannerMode::Scanning => {
                let dropped = self.capture.reset();
                debug!(dropped, "Scan cancelled");
                if let Owner::Scanning { reply, .. } = self.set_owner(Owner::Idle) {
                    let _ = reply.send(Err(ScanError::Cancelled));
                }
            }
            ScannerMode::ManualEntry => {
                let outcome = self.fallback.cancel().unwrap_or(ManualOutcome::Cancelled);
                self.finish_manual(outcome);
            }
        }
    }

    fn on_key(&mut self, ch: char, now: Instant) {
        match self.owner {
            Owner::Scanning { .. } => {
                if let Some(event) = self.capture.on_character(ch, now) {
                    self.on_capture(event);
                }
            }
            Owner::Manual { .. } => trace!("Scanner input dropped during manual entry"),
            Owner::Idle => trace!("Scanner input dropped; no scan requested"),
        }
    }

    async fn on_timer(&mut self, now: Instant) {
        if !self.source_open && now >= self.reopen_at {
            self.try_open().await;
        }

        if let Owner::Scanning { deadline, timeout, .. } = &self.owner {
            let (deadline, timeout) = (*deadline, *timeout);
            if let Some(event) = self.capture.on_idle(now) {
                self.on_capture(event);
            }
            if now >= deadline && matches!(self.owner, Owner::Scanning { .. }) {
                self.scan_timed_out(timeout, now);
            }
        }

        if let Some(outcome) = self.fallback.on_tick(now) {
            self.finish_manual(outcome);
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Candidate(candidate) => {
                let result = self.build_result(
                    ScanSource::AutomaticScan,
                    candidate.code,
                    candidate.quality,
                );
                // The key that closed the burst may have started another
                self.capture.reset();
                if let Owner::Scanning { reply, .. } = self.set_owner(Owner::Idle)
                    && reply.send(Ok(result)).is_err()
                {
                    debug!("Scan result dropped; caller stopped waiting");
                }
            }
            CaptureEvent::Discarded { reason, length } => {
                debug!(%reason, length, "Keystroke burst discarded");
                self.bus.publish(HardwareEvent::scanner(EventPayload::CaptureDiscarded {
                    reason: reason.to_string(),
                    length,
                }));
            }
        }
    }

    fn scan_timed_out(&mut self, timeout: Duration, now: Instant) {
        let waited_ms = timeout.as_millis() as u64;
        self.capture.reset();
        info!(waited_ms, "No code scanned in time");
        self.bus
            .publish(HardwareEvent::scanner(EventPayload::ScanTimeout { waited_ms }));

        let previous = if self.auto_manual {
            self.fallback.reset();
            self.fallback.activate(now);
            self.set_owner(Owner::Manual { reply: None })
        } else {
            self.set_owner(Owner::Idle)
        };
        if let Owner::Scanning { reply, .. } = previous {
            let _ = reply.send(Err(ScanError::timeout(waited_ms)));
        }
    }

    fn finish_manual(&mut self, outcome: ManualOutcome) {
        self.fallback.reset();
        let reply = match self.set_owner(Owner::Idle) {
            Owner::Manual { reply } => reply,
            _ => None,
        };

        let response = match outcome {
            ManualOutcome::Submitted { code, duration } => {
                let quality = ScanQuality::Manual {
                    entry_duration_ms: duration.as_millis() as u64,
                };
                Ok(self.build_result(ScanSource::ManualEntry, code, quality))
            }
            ManualOutcome::Cancelled => {
                self.publish_manual_end("cancelled");
                Err(ScanError::Cancelled)
            }
            ManualOutcome::TimedOut { idle } => {
                self.publish_manual_end("timed_out");
                Err(ScanError::ManualEntryTimeout {
                    idle_ms: idle.as_millis() as u64,
                })
            }
        };

        match reply {
            Some(reply) => {
                let _ = reply.send(response);
            }
            None => debug!("Manual entry ended with no caller attached"),
        }
    }

    fn publish_manual_end(&self, outcome: &str) {
        info!(outcome, "Manual entry ended without a code");
        self.bus.publish(HardwareEvent::scanner(EventPayload::ManualEntryEnded {
            outcome: outcome.to_string(),
        }));
    }

    /// Validate and report a completed capture.
    fn build_result(&self, source: ScanSource, raw: String, quality: ScanQuality) -> ScanResult {
        let validation: Validation = self.shared.validator.validate(&raw).into();
        let result = ScanResult {
            source,
            raw,
            quality,
            validation,
            captured_at: Utc::now(),
        };

        let reason = result.error().map(|e| e.to_string());
        info!(
            source = ?result.source,
            code = %result.code().unwrap_or(&result.raw),
            valid = result.is_valid(),
            "Code captured"
        );
        self.bus.publish(HardwareEvent::scanner(EventPayload::CodeCaptured {
            source,
            code: result.code().unwrap_or(&result.raw).to_string(),
            quality,
            valid: result.is_valid(),
            reason,
        }));
        result
    }

    async fn try_open(&mut self) {
        match self.source.open().await {
            Ok(()) => {
                info!(source = %self.source.describe(), "Scanner input opened");
                self.source_open = true;
            }
            Err(e) => {
                debug!(error = %e, "Scanner input not available");
                self.source_open = false;
                self.reopen_at = Instant::now() + self.reconnect_interval;
            }
        }
        self.refresh_status();
    }

    async fn source_lost(&mut self, error: SourceError) {
        warn!(source = %self.source.describe(), error = %error, "Scanner input lost");
        self.source.close().await;
        self.source_open = false;
        self.reopen_at = Instant::now() + self.reconnect_interval;

        // A burst cut in half is not a code
        let dropped = self.capture.reset();
        if dropped > 0 {
            debug!(dropped, "Partial capture dropped");
        }
        self.refresh_status();
    }
}

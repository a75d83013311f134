//! Offline-tolerant priority queue of print jobs.
//!
//! # Job lifecycle
//!
//! ```text
//! PENDING ──claim──► SENDING ──ack──► PRINTED
//!    ▲                  │
//!    └──retry/backoff───┤
//!                       └──budget spent──► ABANDONED
//! ```
//!
//! # Ordering
//!
//! Three FIFO lanes, drained HIGH before NORMAL before LOW. A job that fails
//! goes back to its original position in its lane (by enqueue sequence), so
//! retries never reorder delivery. A job waiting out its backoff blocks the
//! lanes behind it for the same reason.
//!
//! Claiming moves a job out of its lane under the queue lock, so two drains
//! racing on the same queue can never send the same job twice.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parkpos_core::{
    DeviceEventBus, EventPayload, HardwareEvent, JobId, PrinterConfig, RetryPolicy,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{DeviceConnection, PrinterHealth};
use crate::error::SendError;
use crate::renderer::DocumentKind;
use crate::transport::Transport;

/// Delivery class of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Lanes in drain order.
    pub const ALL: [Priority; 3] = [Self::High, Self::Normal, Self::Low];

    fn lane(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Normal => write!(f, "NORMAL"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Sending,
    Printed,
    Abandoned,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Printed | Self::Abandoned)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Sending) | (Sending, Pending) | (Sending, Printed) | (Sending, Abandoned)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Printed => "PRINTED",
            Self::Abandoned => "ABANDONED",
        };
        write!(f, "{}", s)
    }
}

/// A rendered document waiting for, or done with, the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: JobId,
    pub kind: DocumentKind,
    pub payload: Bytes,
    pub priority: Priority,
    /// Sends that reached the printer, failed or not.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_failure: Option<String>,
    pub state: JobState,
    seq: u64,
    not_before: Option<Instant>,
}

impl PrintJob {
    pub fn new(kind: DocumentKind, payload: impl Into<Bytes>, priority: Priority) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload: payload.into(),
            priority,
            attempts: 0,
            created_at: Utc::now(),
            last_failure: None,
            state: JobState::Pending,
            seq: 0,
            not_before: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition_to(&mut self, next: JobState) -> parkpos_core::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(parkpos_core::Error::invalid_transition(self.state, next));
        }
        self.state = next;
        Ok(())
    }

    /// Earliest time the next attempt may start, if backing off.
    pub fn retry_at(&self) -> Option<Instant> {
        self.not_before
    }

    // Lifecycle violations are programming errors in the queue itself
    fn advance(&mut self, next: JobState) {
        if let Err(e) = self.transition_to(next) {
            panic!("print job {}: {}", self.id, e);
        }
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub pending_by_priority: PendingByPriority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingByPriority {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

/// Result of [`PrintQueue::claim_next`].
#[derive(Debug)]
pub enum Claim {
    /// A job, now SENDING and owned by the caller.
    Ready(PrintJob),

    /// The next job is backing off until the given instant.
    Wait(Instant),

    /// Nothing pending.
    Empty,
}

/// What happened to a job handed back with [`PrintQueue::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in its lane without spending an attempt.
    Returned,

    /// Back in its lane, eligible again after `delay`.
    Retry {
        attempts: u32,
        delay: std::time::Duration,
    },

    /// Out of attempts; kept in the abandoned history.
    Abandoned(PrintJob),
}

/// Why a drain pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStop {
    /// Queue empty.
    Idle,
    /// The link dropped; jobs stay pending.
    Disconnected,
    /// Paper end reported; jobs stay pending.
    OutOfPaper,
    /// The printer reported a blocking fault; jobs stay pending.
    Fault(String),
    /// The next job is backing off until the given instant.
    Backoff(Instant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub printed: usize,
    pub abandoned: usize,
    pub stop: DrainStop,
}

impl DrainReport {
    /// Jobs that reached a terminal state during the pass.
    pub fn processed(&self) -> usize {
        self.printed + self.abandoned
    }
}

/// The front of the first non-empty lane.
enum Head {
    Empty,
    Wait(Instant),
    Due(usize),
}

#[derive(Debug, Default)]
struct QueueInner {
    lanes: [VecDeque<PrintJob>; 3],
    in_flight: HashMap<JobId, PrintJob>,
    abandoned: VecDeque<PrintJob>,
    next_seq: u64,
}

impl QueueInner {
    fn reinsert(&mut self, job: PrintJob) {
        let lane = &mut self.lanes[job.priority.lane()];
        let at = lane.partition_point(|queued| queued.seq < job.seq);
        lane.insert(at, job);
    }
}

/// Pending print jobs for one printer.
#[derive(Debug)]
pub struct PrintQueue {
    inner: Mutex<QueueInner>,
    policy: RetryPolicy,
    history: usize,
}

impl PrintQueue {
    pub fn new(policy: RetryPolicy, history: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            policy,
            history,
        }
    }

    pub fn from_config(config: &PrinterConfig) -> Self {
        Self::new(config.retry_policy(), config.abandoned_history)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a job to the back of its lane. Returns the stored snapshot.
    pub fn enqueue(&self, mut job: PrintJob) -> PrintJob {
        let mut inner = self.inner.lock();
        job.seq = inner.next_seq;
        inner.next_seq += 1;
        job.state = JobState::Pending;
        job.not_before = None;

        debug!(job_id = %job.id, kind = %job.kind, priority = %job.priority, "Job enqueued");
        inner.lanes[job.priority.lane()].push_back(job.clone());
        job
    }

    /// Take the next job in delivery order.
    pub fn claim_next(&self, now: Instant) -> Claim {
        let mut inner = self.inner.lock();
        let lane = match Self::head(&inner, now) {
            Head::Empty => return Claim::Empty,
            Head::Wait(at) => return Claim::Wait(at),
            Head::Due(lane) => lane,
        };

        let Some(mut job) = inner.lanes[lane].pop_front() else {
            return Claim::Empty;
        };
        job.advance(JobState::Sending);
        job.not_before = None;
        inner.in_flight.insert(job.id, job.clone());
        Claim::Ready(job)
    }

    fn head(inner: &QueueInner, now: Instant) -> Head {
        let Some(lane) = inner.lanes.iter().position(|lane| !lane.is_empty()) else {
            return Head::Empty;
        };
        match inner.lanes[lane].front().and_then(|job| job.not_before) {
            Some(at) if at > now => Head::Wait(at),
            _ => Head::Due(lane),
        }
    }

    /// Record a successful send.
    pub fn complete(&self, mut job: PrintJob) -> PrintJob {
        self.release(&job);
        job.attempts += 1;
        job.advance(JobState::Printed);
        job
    }

    /// Hand a job back after a failed send.
    pub fn fail(&self, mut job: PrintJob, error: &SendError, now: Instant) -> FailOutcome {
        self.release(&job);
        job.last_failure = Some(error.to_string());

        if !error.counts_as_attempt() {
            job.advance(JobState::Pending);
            self.inner.lock().reinsert(job);
            return FailOutcome::Returned;
        }

        job.attempts += 1;
        if self.policy.is_exhausted(job.attempts) {
            job.advance(JobState::Abandoned);
            let mut inner = self.inner.lock();
            inner.abandoned.push_back(job.clone());
            while inner.abandoned.len() > self.history {
                inner.abandoned.pop_front();
            }
            return FailOutcome::Abandoned(job);
        }

        let delay = self.policy.backoff(job.attempts);
        job.advance(JobState::Pending);
        job.not_before = Some(now + delay);
        let attempts = job.attempts;
        self.inner.lock().reinsert(job);
        FailOutcome::Retry { attempts, delay }
    }

    fn release(&self, job: &PrintJob) {
        let removed = self.inner.lock().in_flight.remove(&job.id);
        assert!(
            removed.is_some(),
            "print job {} returned to a queue that did not hand it out",
            job.id
        );
    }

    /// Put jobs whose send was interrupted back in their lanes.
    ///
    /// Used when a drain pass is torn down mid-send (service shutdown); the
    /// job never left SENDING through `complete` or `fail`, so it keeps its
    /// attempt count and place in line.
    pub fn reclaim_in_flight(&self) -> usize {
        let mut inner = self.inner.lock();
        let interrupted: Vec<PrintJob> = inner.in_flight.drain().map(|(_, job)| job).collect();
        let count = interrupted.len();
        for mut job in interrupted {
            job.advance(JobState::Pending);
            inner.reinsert(job);
        }
        count
    }

    pub fn peek_status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        let [high, normal, low] = &inner.lanes;
        let by = PendingByPriority {
            high: high.len(),
            normal: normal.len(),
            low: low.len(),
        };
        QueueStatus {
            pending: by.high + by.normal + by.low,
            in_flight: inner.in_flight.len(),
            pending_by_priority: by,
        }
    }

    pub fn is_empty(&self) -> bool {
        let status = self.peek_status();
        status.pending == 0 && status.in_flight == 0
    }

    /// Pending jobs in delivery order.
    pub fn pending_jobs(&self) -> Vec<PrintJob> {
        let inner = self.inner.lock();
        inner.lanes.iter().flatten().cloned().collect()
    }

    /// Abandoned jobs still remembered, oldest first.
    pub fn abandoned_jobs(&self) -> Vec<PrintJob> {
        self.inner.lock().abandoned.iter().cloned().collect()
    }

    /// Enqueue a fresh copy of an abandoned job.
    ///
    /// The copy gets a new id and a full attempt budget; the abandoned
    /// record is kept.
    pub fn requeue_abandoned(&self, id: JobId) -> Option<PrintJob> {
        let original = self
            .inner
            .lock()
            .abandoned
            .iter()
            .find(|job| job.id == id)
            .cloned()?;
        let copy = PrintJob::new(original.kind, original.payload, original.priority);
        info!(original = %id, job_id = %copy.id, "Re-printing abandoned job");
        Some(self.enqueue(copy))
    }

    /// Send pending jobs until the queue is empty, the head job is backing
    /// off, or the printer stops accepting them.
    ///
    /// Printer health is read before each claim. A network printer takes
    /// bytes without paper, so a failed write is not the only signal.
    pub async fn drain<T: Transport>(
        &self,
        conn: &mut DeviceConnection<T>,
        bus: &DeviceEventBus,
    ) -> DrainReport {
        let mut report = DrainReport {
            printed: 0,
            abandoned: 0,
            stop: DrainStop::Idle,
        };

        loop {
            if !conn.is_connected() {
                report.stop = DrainStop::Disconnected;
                return report;
            }

            let head = Self::head(&self.inner.lock(), Instant::now());
            match head {
                Head::Empty => return report,
                Head::Wait(at) => {
                    report.stop = DrainStop::Backoff(at);
                    return report;
                }
                Head::Due(_) => {}
            }

            match conn.health().await {
                PrinterHealth::PaperOut => {
                    report.stop = DrainStop::OutOfPaper;
                    return report;
                }
                PrinterHealth::Fault(reason) => {
                    report.stop = DrainStop::Fault(reason);
                    return report;
                }
                PrinterHealth::Ok | PrinterHealth::Unknown => {}
            }
            if !conn.is_connected() {
                report.stop = DrainStop::Disconnected;
                return report;
            }

            let job = match self.claim_next(Instant::now()) {
                Claim::Empty => return report,
                Claim::Wait(at) => {
                    report.stop = DrainStop::Backoff(at);
                    return report;
                }
                Claim::Ready(job) => job,
            };

            debug!(job_id = %job.id, attempt = job.attempts + 1, "Sending job");
            let error = match conn.send(&job.payload).await {
                Ok(_) => {
                    let job = self.complete(job);
                    info!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "Job printed");
                    bus.publish(HardwareEvent::printer(EventPayload::JobCompleted {
                        job_id: job.id,
                        document: job.kind.name().to_string(),
                        attempts: job.attempts,
                    }));
                    report.printed += 1;
                    continue;
                }
                Err(e) => e,
            };

            // A printer that is out of paper or jammed rejects writes; that
            // is a resource condition, not a failed attempt.
            let (error, stop) = if conn.is_connected() {
                match conn.health().await {
                    PrinterHealth::PaperOut => (SendError::OutOfPaper, Some(DrainStop::OutOfPaper)),
                    PrinterHealth::Fault(reason) => {
                        (SendError::fault(reason.clone()), Some(DrainStop::Fault(reason)))
                    }
                    PrinterHealth::Ok | PrinterHealth::Unknown => (error, None),
                }
            } else {
                (error, None)
            };

            let job_id = job.id;
            let document = job.kind.name();
            match self.fail(job, &error, Instant::now()) {
                FailOutcome::Returned => {
                    debug!(job_id = %job_id, reason = %error, "Job returned to queue");
                }
                FailOutcome::Retry { attempts, delay } => {
                    let retry_in_ms = delay.as_millis() as u64;
                    warn!(job_id = %job_id, attempts, retry_in_ms, reason = %error, "Print attempt failed");
                    bus.publish(HardwareEvent::printer(EventPayload::JobRetryScheduled {
                        job_id,
                        attempts,
                        retry_in_ms,
                        reason: error.to_string(),
                    }));
                }
                FailOutcome::Abandoned(job) => {
                    warn!(job_id = %job_id, attempts = job.attempts, reason = %error, "Job abandoned");
                    bus.publish(HardwareEvent::printer(EventPayload::JobAbandoned {
                        job_id,
                        document: document.to_string(),
                        attempts: job.attempts,
                        reason: error.to_string(),
                    }));
                    report.abandoned += 1;
                }
            }

            if let Some(stop) = stop {
                report.stop = stop;
                return report;
            }
        }
    }
}

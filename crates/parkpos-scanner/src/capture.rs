//! Keystroke burst capture.
//!
//! A keyboard-wedge scanner "types" a whole code in a few milliseconds; a
//! human needs a hundred or more per key. [`ScanCapture`] uses that gap to
//! tell the two apart.
//!
//! # States
//!
//! ```text
//!            char                 gap ≥ threshold / terminator
//!   Idle ───────────► Accumulating ─────────────────────────► Idle (+ Candidate | Discarded)
//!                        │  ceiling exceeded / buffer overflow
//!                        ▼
//!                     Discarding ── gap ≥ threshold ──► Idle
//! ```
//!
//! `Discarding` swallows the rest of a runaway burst so its tail is not
//! mistaken for the start of a new code.
//!
//! The machine is pure: every call takes the current [`Instant`] and the
//! owner drives [`ScanCapture::on_idle`] from a timer armed at
//! [`ScanCapture::deadline`].

use std::fmt;
use std::time::Duration;

use parkpos_core::{ScanQuality, ScannerConfig};
use tokio::time::Instant;
use tracing::trace;

/// Timing and size limits for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Keystrokes closer than this belong to the same burst.
    pub threshold: Duration,
    /// Longest a single candidate may stay in progress.
    pub ceiling: Duration,
    pub min_len: usize,
    pub max_len: usize,
    pub terminators: Vec<char>,
}

impl CaptureSettings {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            threshold: config.inter_char_threshold(),
            ceiling: config.capture_ceiling(),
            min_len: config.symbology.min_length,
            max_len: config.max_candidate_len,
            terminators: config.terminators.chars().collect(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Accumulating,
    Discarding,
}

/// A completed burst, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub code: String,
    pub quality: ScanQuality,
    /// First to last keystroke.
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Fewer characters than the shortest valid code: stray keystrokes.
    TooShort,
    /// In progress for longer than the ceiling.
    CeilingExceeded,
    /// More characters than any code can have.
    Overflow,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TooShort => "too_short",
            Self::CeilingExceeded => "ceiling_exceeded",
            Self::Overflow => "overflow",
        };
        f.write_str(s)
    }
}

/// Outcome of feeding the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Candidate(Candidate),
    Discarded { reason: DiscardReason, length: usize },
}

#[derive(Debug)]
pub struct ScanCapture {
    settings: CaptureSettings,
    state: CaptureState,
    buf: String,
    len: usize,
    started: Option<Instant>,
    last: Option<Instant>,
}

impl ScanCapture {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            state: CaptureState::Idle,
            buf: String::new(),
            len: 0,
            started: None,
            last: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_accumulating(&self) -> bool {
        self.state == CaptureState::Accumulating
    }

    /// Characters buffered for the candidate in progress.
    pub fn buffered(&self) -> usize {
        self.len
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Feed one keystroke received at `now`.
    ///
    /// A keystroke after a quiet period first closes the previous burst; the
    /// returned event belongs to that burst and `ch` starts a new one.
    pub fn on_character(&mut self, ch: char, now: Instant) -> Option<CaptureEvent> {
        let gap_over = self.last.is_some_and(|last| now - last >= self.settings.threshold);

        match self.state {
            CaptureState::Discarding if !gap_over => {
                self.last = Some(now);
                return None;
            }
            CaptureState::Discarding => {
                self.reset();
            }
            CaptureState::Accumulating if gap_over => {
                let event = self.finish();
                if !self.is_terminator(ch) {
                    self.begin(ch, now);
                }
                return event;
            }
            CaptureState::Accumulating | CaptureState::Idle => {}
        }

        if self.is_terminator(ch) {
            return match self.state {
                CaptureState::Accumulating => self.finish(),
                _ => None,
            };
        }

        if self.state == CaptureState::Idle {
            self.begin(ch, now);
            return None;
        }

        if self.started.is_some_and(|started| now - started > self.settings.ceiling) {
            self.last = Some(now);
            return Some(self.discard(DiscardReason::CeilingExceeded));
        }
        if self.len >= self.settings.max_len {
            self.last = Some(now);
            return Some(self.discard(DiscardReason::Overflow));
        }

        self.buf.push(ch);
        self.len += 1;
        self.last = Some(now);
        None
    }

    /// Called by the owner's timer. Closes a burst whose quiet period has
    /// elapsed and enforces the ceiling.
    pub fn on_idle(&mut self, now: Instant) -> Option<CaptureEvent> {
        let gap_over = self.last.is_some_and(|last| now - last >= self.settings.threshold);
        match self.state {
            CaptureState::Idle => None,
            CaptureState::Discarding => {
                if gap_over {
                    self.reset();
                }
                None
            }
            CaptureState::Accumulating => {
                if self.started.is_some_and(|started| now - started > self.settings.ceiling) {
                    // The burst goes on but this candidate is over
                    Some(self.discard(DiscardReason::CeilingExceeded))
                } else if gap_over {
                    self.finish()
                } else {
                    None
                }
            }
        }
    }

    /// When [`on_idle`](Self::on_idle) next has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        let quiet = self.last.map(|last| last + self.settings.threshold);
        match self.state {
            CaptureState::Idle => None,
            CaptureState::Discarding => quiet,
            CaptureState::Accumulating => {
                let ceiling = self
                    .started
                    .map(|started| started + self.settings.ceiling + Duration::from_millis(1));
                match (quiet, ceiling) {
                    (Some(q), Some(c)) => Some(q.min(c)),
                    (q, c) => q.or(c),
                }
            }
        }
    }

    /// Drop any partial input and return to `Idle`. Returns the number of
    /// characters thrown away.
    pub fn reset(&mut self) -> usize {
        let dropped = self.len;
        self.state = CaptureState::Idle;
        self.buf.clear();
        self.len = 0;
        self.started = None;
        self.last = None;
        dropped
    }

    fn is_terminator(&self, ch: char) -> bool {
        self.settings.terminators.contains(&ch)
    }

    fn begin(&mut self, ch: char, now: Instant) {
        self.state = CaptureState::Accumulating;
        self.buf.clear();
        self.buf.push(ch);
        self.len = 1;
        self.started = Some(now);
        self.last = Some(now);
    }

    fn discard(&mut self, reason: DiscardReason) -> CaptureEvent {
        let length = self.len;
        trace!(%reason, length, "Capture discarded");
        self.state = CaptureState::Discarding;
        self.buf.clear();
        self.len = 0;
        self.started = None;
        CaptureEvent::Discarded { reason, length }
    }

    fn finish(&mut self) -> Option<CaptureEvent> {
        let (Some(started), Some(last)) = (self.started, self.last) else {
            self.reset();
            return None;
        };
        let length = self.len;
        if length < self.settings.min_len {
            self.reset();
            return Some(CaptureEvent::Discarded {
                reason: DiscardReason::TooShort,
                length,
            });
        }

        let duration = last - started;
        let gaps = (length - 1).max(1) as u128;
        let mean_gap_ms = (duration.as_millis() / gaps) as u64;
        let quality = ScanQuality::from_gap(mean_gap_ms, self.settings.threshold.as_millis() as u64);
        let code = std::mem::take(&mut self.buf);
        self.reset();

        Some(CaptureEvent::Candidate(Candidate {
            code,
            quality,
            duration,
        }))
    }
}

//! Manual code entry by the operator.
//!
//! ```text
//!  Inactive ── activate ──► Active ──► Submitted | Cancelled | TimedOut
//! ```
//!
//! The inactivity timer restarts on every keystroke. The owner must observe
//! the outcome and call [`ManualEntryFallback::reset`] before the fallback
//! can be activated again.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// One operator action on the manual entry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualInput {
    Char(char),
    Backspace,
    Clear,
    Submit,
    Cancel,
}

impl ManualInput {
    /// Keystrokes for `text` followed by `Submit`.
    pub fn typed(text: &str) -> Vec<ManualInput> {
        text.chars()
            .map(ManualInput::Char)
            .chain(std::iter::once(ManualInput::Submit))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Inactive,
    Active,
    Submitted,
    Cancelled,
    TimedOut,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Cancelled | Self::TimedOut)
    }
}

/// How a manual entry session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    Submitted { code: String, duration: Duration },
    Cancelled,
    TimedOut { idle: Duration },
}

impl fmt::Display for ManualOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted { .. } => write!(f, "submitted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut { .. } => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug)]
pub struct ManualEntryFallback {
    state: FallbackState,
    buf: String,
    max_len: usize,
    idle_timeout: Duration,
    activated_at: Option<Instant>,
    last_input: Option<Instant>,
}

impl ManualEntryFallback {
    pub fn new(idle_timeout: Duration, max_len: usize) -> Self {
        Self {
            state: FallbackState::Inactive,
            buf: String::new(),
            max_len,
            idle_timeout,
            activated_at: None,
            last_input: None,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == FallbackState::Active
    }

    /// Text typed so far.
    pub fn buffer(&self) -> &str {
        &self.buf
    }

    /// Start a session. Returns `false` if one is already running.
    pub fn activate(&mut self, now: Instant) -> bool {
        if self.is_active() {
            return false;
        }
        self.state = FallbackState::Active;
        self.buf.clear();
        self.activated_at = Some(now);
        self.last_input = Some(now);
        true
    }

    /// Apply one operator action. Returns the outcome when the session ends.
    ///
    /// Input while inactive is ignored. Submitting an empty field keeps the
    /// session open.
    pub fn input(&mut self, input: ManualInput, now: Instant) -> Option<ManualOutcome> {
        if !self.is_active() {
            return None;
        }
        self.last_input = Some(now);

        match input {
            ManualInput::Char(c) if !c.is_control() => {
                if self.buf.chars().count() < self.max_len {
                    self.buf.push(c);
                }
                None
            }
            ManualInput::Char(_) => None,
            ManualInput::Backspace => {
                self.buf.pop();
                None
            }
            ManualInput::Clear => {
                self.buf.clear();
                None
            }
            ManualInput::Submit if self.buf.trim().is_empty() => None,
            ManualInput::Submit => {
                self.state = FallbackState::Submitted;
                let duration = self.activated_at.map(|at| now - at).unwrap_or_default();
                Some(ManualOutcome::Submitted {
                    code: std::mem::take(&mut self.buf),
                    duration,
                })
            }
            ManualInput::Cancel => self.cancel(),
        }
    }

    /// End the session without a code. Returns `None` if none was active.
    pub fn cancel(&mut self) -> Option<ManualOutcome> {
        if !self.is_active() {
            return None;
        }
        self.state = FallbackState::Cancelled;
        self.buf.clear();
        Some(ManualOutcome::Cancelled)
    }

    /// Check the inactivity timer.
    pub fn on_tick(&mut self, now: Instant) -> Option<ManualOutcome> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.state = FallbackState::TimedOut;
        self.buf.clear();
        Some(ManualOutcome::TimedOut {
            idle: self.idle_timeout,
        })
    }

    /// When the session times out if nothing is typed.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.is_active() {
            return None;
        }
        self.last_input.map(|last| last + self.idle_timeout)
    }

    /// Return to `Inactive` after the outcome has been handled.
    pub fn reset(&mut self) {
        self.state = FallbackState::Inactive;
        self.buf.clear();
        self.activated_at = None;
        self.last_input = None;
    }
}

//! Default values for the peripheral configuration.
//!
//! Every tunable in [`crate::config`] falls back to one of these constants.
//! The timing values were measured against a single keyboard-wedge scanner
//! model and a 58mm thermal printer; other hardware may need different
//! numbers, which is why they are configuration and not code.
//!
//! # Usage
//!
//! ```
//! use parkpos_core::constants::*;
//! use std::time::Duration;
//!
//! let threshold = Duration::from_millis(DEFAULT_INTER_CHAR_THRESHOLD_MS);
//! assert!(threshold < Duration::from_millis(DEFAULT_CAPTURE_CEILING_MS));
//! ```

// ============================================================================
// Printer transport
// ============================================================================

/// Default TCP port for raw ESC/POS printing.
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

/// Default printer host.
pub const DEFAULT_PRINTER_HOST: &str = "127.0.0.1";

/// Handshake timeout for `connect()`.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Timeout for a single payload write.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Timeout for the real-time status probe round trip.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Interval between reconnect attempts while disconnected.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 10_000;

/// Interval between liveness probes while idle or paused.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

// ============================================================================
// Print queue
// ============================================================================

/// Total send attempts before a job is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles with every failed attempt.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound for the retry delay.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Number of abandoned jobs kept for manual re-printing.
pub const DEFAULT_ABANDONED_HISTORY: usize = 50;

// ============================================================================
// Receipt layout
// ============================================================================

/// Characters per line on 58mm paper.
pub const DEFAULT_COLUMNS: usize = 32;

/// Character printed in place of anything the code page cannot encode.
pub const PLACEHOLDER_CHAR: char = '?';

// ============================================================================
// Scanner timing
// ============================================================================

/// Maximum gap between two keystrokes of the same scanner burst.
pub const DEFAULT_INTER_CHAR_THRESHOLD_MS: u64 = 30;

/// Hard ceiling for a single candidate in progress.
pub const DEFAULT_CAPTURE_CEILING_MS: u64 = 2_000;

/// Inactivity timeout for manual entry.
pub const DEFAULT_MANUAL_ENTRY_TIMEOUT_MS: u64 = 30_000;

/// Longest candidate buffered before it is discarded as noise.
pub const DEFAULT_MAX_CANDIDATE_LEN: usize = 64;

/// Characters that end a scanner burst (scanner suffix).
pub const DEFAULT_TERMINATORS: &str = "\r\n";

// ============================================================================
// Symbology
// ============================================================================

/// Code 39 character set (full ASCII extension excluded).
pub const CODE39_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-. $/+%";

/// Shortest ticket code accepted by default.
pub const DEFAULT_MIN_CODE_LENGTH: usize = 4;

/// Longest ticket code accepted by default.
pub const DEFAULT_MAX_CODE_LENGTH: usize = 20;

// ============================================================================
// Event bus
// ============================================================================

/// Capacity of the broadcast channel behind the event bus.
///
/// Slow subscribers that fall further behind than this skip the oldest
/// events instead of blocking publishers.
pub const EVENT_BUS_CAPACITY: usize = 256;

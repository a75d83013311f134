//! Typed configuration for both peripherals.
//!
//! Every field has a documented default (see [`crate::constants`]), so an
//! empty TOML document is a valid configuration:
//!
//! ```
//! use parkpos_core::config::AppConfig;
//!
//! let config = AppConfig::from_toml_str("").unwrap();
//! assert_eq!(config.printer.columns, 32);
//! assert_eq!(config.scanner.inter_char_threshold_ms, 30);
//! ```
//!
//! A typical deployment file:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [printer]
//! transport = { type = "tcp", host = "192.168.1.50", port = 9100 }
//! max_attempts = 5
//!
//! [scanner]
//! source = { type = "device", path = "/dev/ttyACM0" }
//!
//! [scanner.symbology]
//! name = "ticket"
//! alphabet = "0123456789T-"
//! min_length = 7
//! max_length = 7
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Root configuration object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub printer: PrinterConfig,
    pub scanner: ScannerConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make the services misbehave.
    pub fn validate(&self) -> Result<()> {
        self.printer.validate()?;
        self.scanner.validate()
    }
}

/// Log filter used by the binary when `RUST_LOG` is not set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Physical link to the printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TransportTarget {
    /// Raw socket printing (`host:port`).
    Tcp { host: String, port: u16 },

    /// Raw write endpoint such as `/dev/usb/lp0`.
    Device { path: PathBuf },
}

impl Default for TransportTarget {
    fn default() -> Self {
        Self::Tcp {
            host: DEFAULT_PRINTER_HOST.to_string(),
            port: DEFAULT_PRINTER_PORT,
        }
    }
}

impl std::fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Device { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Printer transport, queue and layout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub transport: TransportTarget,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    /// Total send attempts per job, first try included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub reconnect_interval_ms: u64,
    pub health_check_interval_ms: u64,
    /// Characters per printed line.
    pub columns: usize,
    /// Abandoned jobs remembered for manual re-printing.
    pub abandoned_history: usize,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            transport: TransportTarget::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            columns: DEFAULT_COLUMNS,
            abandoned_history: DEFAULT_ABANDONED_HISTORY,
        }
    }
}

impl PrinterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("printer.max_attempts must be at least 1"));
        }
        if self.columns == 0 {
            return Err(Error::config("printer.columns must be greater than zero"));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(Error::config(format!(
                "printer.backoff_base_ms ({}) exceeds printer.backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        if self.reconnect_interval_ms == 0 || self.health_check_interval_ms == 0 {
            return Err(Error::config("printer intervals must be greater than zero"));
        }
        if let TransportTarget::Tcp { host, .. } = &self.transport
            && host.trim().is_empty()
        {
            return Err(Error::config("printer.transport.host is empty"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failed sends.
    ///
    /// `base × 2^(attempts-1)`, capped.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkpos_core::config::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 10,
    ///     base: Duration::from_secs(1),
    ///     cap: Duration::from_secs(30),
    /// };
    /// assert_eq!(policy.backoff(1), Duration::from_secs(1));
    /// assert_eq!(policy.backoff(3), Duration::from_secs(4));
    /// assert_eq!(policy.backoff(9), Duration::from_secs(30));
    /// ```
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether a job with this many failed attempts is out of budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        PrinterConfig::default().retry_policy()
    }
}

/// Where scanner keystrokes come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InputSource {
    /// Keyboard-wedge scanner feeding the process's standard input.
    #[default]
    Stdin,

    /// Character device (serial/CDC-ACM scanner).
    Device { path: PathBuf },
}

/// Optional check digit carried as the last character of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumRule {
    #[default]
    None,

    /// Code 39 modulo 43 check character.
    Mod43,

    /// Luhn modulo 10 check digit.
    Mod10,
}

/// Rules that define which codes are valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbologyConfig {
    pub name: String,
    pub alphabet: String,
    pub min_length: usize,
    pub max_length: usize,
    pub checksum: ChecksumRule,
    /// Uppercase input before validation.
    pub normalize_case: bool,
}

impl SymbologyConfig {
    /// Code 39 with the default ticket length bounds.
    pub fn code39() -> Self {
        Self {
            name: "code39".to_string(),
            alphabet: CODE39_ALPHABET.to_string(),
            min_length: DEFAULT_MIN_CODE_LENGTH,
            max_length: DEFAULT_MAX_CODE_LENGTH,
            checksum: ChecksumRule::None,
            normalize_case: true,
        }
    }

    /// Digits only, with a Luhn check digit.
    pub fn numeric_luhn(min_length: usize, max_length: usize) -> Self {
        Self {
            name: "numeric-luhn".to_string(),
            alphabet: "0123456789".to_string(),
            min_length,
            max_length,
            checksum: ChecksumRule::Mod10,
            normalize_case: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.alphabet.is_empty() {
            return Err(Error::config("scanner.symbology.alphabet is empty"));
        }
        if self.min_length == 0 {
            return Err(Error::config("scanner.symbology.min_length must be at least 1"));
        }
        if self.min_length > self.max_length {
            return Err(Error::config(format!(
                "scanner.symbology.min_length ({}) exceeds max_length ({})",
                self.min_length, self.max_length
            )));
        }
        if self.checksum == ChecksumRule::Mod10 && !self.alphabet.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::config("mod10 checksum requires a numeric alphabet"));
        }
        Ok(())
    }
}

impl Default for SymbologyConfig {
    fn default() -> Self {
        Self::code39()
    }
}

/// Scanner timing, input and symbology settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub source: InputSource,
    /// Keystrokes closer than this belong to the same burst.
    pub inter_char_threshold_ms: u64,
    /// Hard limit for one candidate in progress.
    pub capture_ceiling_ms: u64,
    pub manual_entry_timeout_ms: u64,
    pub max_candidate_len: usize,
    /// Characters that end a burst immediately.
    pub terminators: String,
    /// Open manual entry as soon as a scan wait times out.
    pub auto_manual_on_timeout: bool,
    pub reconnect_interval_ms: u64,
    pub symbology: SymbologyConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            source: InputSource::default(),
            inter_char_threshold_ms: DEFAULT_INTER_CHAR_THRESHOLD_MS,
            capture_ceiling_ms: DEFAULT_CAPTURE_CEILING_MS,
            manual_entry_timeout_ms: DEFAULT_MANUAL_ENTRY_TIMEOUT_MS,
            max_candidate_len: DEFAULT_MAX_CANDIDATE_LEN,
            terminators: DEFAULT_TERMINATORS.to_string(),
            auto_manual_on_timeout: false,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            symbology: SymbologyConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inter_char_threshold_ms == 0 {
            return Err(Error::config(
                "scanner.inter_char_threshold_ms must be greater than zero",
            ));
        }
        if self.capture_ceiling_ms <= self.inter_char_threshold_ms {
            return Err(Error::config(
                "scanner.capture_ceiling_ms must exceed inter_char_threshold_ms",
            ));
        }
        if self.manual_entry_timeout_ms == 0 || self.reconnect_interval_ms == 0 {
            return Err(Error::config("scanner timeouts must be greater than zero"));
        }
        if self.max_candidate_len < self.symbology.max_length {
            return Err(Error::config(
                "scanner.max_candidate_len is shorter than symbology.max_length",
            ));
        }
        self.symbology.validate()
    }

    pub fn inter_char_threshold(&self) -> Duration {
        Duration::from_millis(self.inter_char_threshold_ms)
    }

    pub fn capture_ceiling(&self) -> Duration {
        Duration::from_millis(self.capture_ceiling_ms)
    }

    pub fn manual_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_entry_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

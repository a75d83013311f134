//! Types shared by the printer and scanner services.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of physical peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Thermal receipt printer.
    Printer,

    /// Barcode scanner.
    Scanner,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Printer => write!(f, "impresora"),
            Self::Scanner => write!(f, "escáner"),
        }
    }
}

/// Health of a single physical device as seen by its owning service.
///
/// Only the owning service changes it; everyone else reads it through a
/// status query or a `StatusChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// No link to the device.
    Disconnected,

    /// Handshake in progress.
    Connecting,

    /// Linked and idle.
    Ready,

    /// Linked and working (draining jobs, waiting for a code).
    Busy,

    /// The device reported a fault that blocks work.
    Error,

    /// The device ran out of paper.
    OutOfConsumable,
}

impl DeviceStatus {
    /// Whether the device can currently accept work.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    /// Short operator-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Desconectado",
            Self::Connecting => "Conectando",
            Self::Ready => "Listo",
            Self::Busy => "Ocupado",
            Self::Error => "Error",
            Self::OutOfConsumable => "Sin papel",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::Busy => "BUSY",
            Self::Error => "ERROR",
            Self::OutOfConsumable => "OUT_OF_CONSUMABLE",
        };
        write!(f, "{}", s)
    }
}

/// Which component currently owns scanner input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerMode {
    /// Nobody is waiting for a code.
    Idle,

    /// Automatic capture is armed.
    Scanning,

    /// The operator is typing the code by hand.
    ManualEntry,
}

impl fmt::Display for ScannerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "inactivo"),
            Self::Scanning => write!(f, "escaneando"),
            Self::ManualEntry => write!(f, "entrada manual"),
        }
    }
}

/// Where a scanned code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanSource {
    AutomaticScan,
    ManualEntry,
}

/// Confidence in a captured code, derived from keystroke timing.
///
/// Automatic captures are graded by the mean gap between keystrokes relative
/// to the inter-character threshold. Manual entries carry the time the
/// operator took instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "grade")]
pub enum ScanQuality {
    /// Mean gap at most a third of the threshold.
    Excellent { mean_gap_ms: u64 },

    /// Mean gap at most two thirds of the threshold.
    Good { mean_gap_ms: u64 },

    /// Mean gap close to the threshold.
    Fair { mean_gap_ms: u64 },

    /// Typed by the operator.
    Manual { entry_duration_ms: u64 },
}

impl ScanQuality {
    /// Grade an automatic burst from its mean inter-keystroke gap.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkpos_core::ScanQuality;
    ///
    /// assert!(matches!(ScanQuality::from_gap(5, 30), ScanQuality::Excellent { .. }));
    /// assert!(matches!(ScanQuality::from_gap(15, 30), ScanQuality::Good { .. }));
    /// assert!(matches!(ScanQuality::from_gap(28, 30), ScanQuality::Fair { .. }));
    /// ```
    pub fn from_gap(mean_gap_ms: u64, threshold_ms: u64) -> Self {
        if mean_gap_ms * 3 <= threshold_ms {
            Self::Excellent { mean_gap_ms }
        } else if mean_gap_ms * 3 <= threshold_ms * 2 {
            Self::Good { mean_gap_ms }
        } else {
            Self::Fair { mean_gap_ms }
        }
    }
}

/// Opaque print job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_display_matches_serde() {
        for status in [
            DeviceStatus::Disconnected,
            DeviceStatus::Connecting,
            DeviceStatus::Ready,
            DeviceStatus::Busy,
            DeviceStatus::Error,
            DeviceStatus::OutOfConsumable,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }

    #[test]
    fn test_device_status_operational() {
        assert!(DeviceStatus::Ready.is_operational());
        assert!(DeviceStatus::Busy.is_operational());
        assert!(!DeviceStatus::OutOfConsumable.is_operational());
        assert!(!DeviceStatus::Disconnected.is_operational());
    }

    #[test]
    fn test_scan_quality_boundaries() {
        assert_eq!(
            ScanQuality::from_gap(10, 30),
            ScanQuality::Excellent { mean_gap_ms: 10 }
        );
        assert_eq!(
            ScanQuality::from_gap(20, 30),
            ScanQuality::Good { mean_gap_ms: 20 }
        );
        assert_eq!(
            ScanQuality::from_gap(21, 30),
            ScanQuality::Fair { mean_gap_ms: 21 }
        );
    }

    #[test]
    fn test_job_id_parse_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}

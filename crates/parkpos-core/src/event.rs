//! Hardware events published on the [`DeviceEventBus`](crate::DeviceEventBus).
//!
//! Every event has the same shape: the device it concerns, a coarse
//! [`EventType`] for routing, a typed [`EventPayload`] and a wall-clock
//! timestamp. Events are fire-and-forget; nothing in this workspace persists
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceKind, DeviceStatus, JobId, ScanQuality, ScanSource, ScannerMode};

/// Coarse classification used by subscribers to filter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    StatusChanged,
    Error,
    JobCompleted,
    CodeCaptured,
    CaptureDiscarded,
    ScanTimeout,
    ModeChanged,
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum EventPayload {
    /// Device status moved between two states.
    StatusChanged {
        from: DeviceStatus,
        to: DeviceStatus,
    },

    /// Transport link went up or down.
    LinkChanged { connected: bool, target: String },

    /// A print job reached the printer.
    JobCompleted {
        job_id: JobId,
        document: String,
        attempts: u32,
    },

    /// A single send attempt failed and the job went back to the queue.
    JobRetryScheduled {
        job_id: JobId,
        attempts: u32,
        retry_in_ms: u64,
        reason: String,
    },

    /// A print job exhausted its retry budget.
    JobAbandoned {
        job_id: JobId,
        document: String,
        attempts: u32,
        reason: String,
    },

    /// Generic device failure that does not fit the other variants.
    DeviceError { message: String },

    /// A code was captured, automatically or by hand.
    CodeCaptured {
        source: ScanSource,
        code: String,
        quality: ScanQuality,
        valid: bool,
        reason: Option<String>,
    },

    /// A keystroke burst was thrown away as noise.
    CaptureDiscarded { reason: String, length: usize },

    /// Nobody scanned anything within the caller's timeout.
    ScanTimeout { waited_ms: u64 },

    /// Manual entry ended without a code.
    ManualEntryEnded { outcome: String },

    /// Scanner input ownership changed.
    ModeChanged { from: ScannerMode, to: ScannerMode },
}

impl EventPayload {
    /// Routing class of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::StatusChanged { .. } | Self::LinkChanged { .. } => EventType::StatusChanged,
            Self::JobCompleted { .. } => EventType::JobCompleted,
            Self::JobRetryScheduled { .. }
            | Self::JobAbandoned { .. }
            | Self::DeviceError { .. }
            | Self::ManualEntryEnded { .. } => EventType::Error,
            Self::CodeCaptured { .. } => EventType::CodeCaptured,
            Self::CaptureDiscarded { .. } => EventType::CaptureDiscarded,
            Self::ScanTimeout { .. } => EventType::ScanTimeout,
            Self::ModeChanged { .. } => EventType::ModeChanged,
        }
    }
}

/// A single observation about a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareEvent {
    pub device_kind: DeviceKind,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl HardwareEvent {
    /// Create an event stamped with the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkpos_core::{DeviceKind, DeviceStatus, EventPayload, EventType, HardwareEvent};
    ///
    /// let event = HardwareEvent::new(
    ///     DeviceKind::Printer,
    ///     EventPayload::StatusChanged {
    ///         from: DeviceStatus::Disconnected,
    ///         to: DeviceStatus::Ready,
    ///     },
    /// );
    /// assert_eq!(event.event_type, EventType::StatusChanged);
    /// ```
    pub fn new(device_kind: DeviceKind, payload: EventPayload) -> Self {
        Self {
            device_kind,
            event_type: payload.event_type(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn printer(payload: EventPayload) -> Self {
        Self::new(DeviceKind::Printer, payload)
    }

    pub fn scanner(payload: EventPayload) -> Self {
        Self::new(DeviceKind::Scanner, payload)
    }

    /// Whether this event should be surfaced as a warning.
    pub fn is_error(&self) -> bool {
        self.event_type == EventType::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_follows_payload() {
        let abandoned = HardwareEvent::printer(EventPayload::JobAbandoned {
            job_id: JobId::new(),
            document: "ENTRY_TICKET".to_string(),
            attempts: 3,
            reason: "timeout".to_string(),
        });
        assert_eq!(abandoned.event_type, EventType::Error);
        assert!(abandoned.is_error());

        let captured = HardwareEvent::scanner(EventPayload::CodeCaptured {
            source: ScanSource::AutomaticScan,
            code: "T-00099".to_string(),
            quality: ScanQuality::Excellent { mean_gap_ms: 4 },
            valid: true,
            reason: None,
        });
        assert_eq!(captured.event_type, EventType::CodeCaptured);
        assert_eq!(captured.device_kind, DeviceKind::Scanner);
    }

    #[test]
    fn test_event_serializes_with_fixed_shape() {
        let event = HardwareEvent::printer(EventPayload::StatusChanged {
            from: DeviceStatus::Disconnected,
            to: DeviceStatus::Ready,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["deviceKind"], "printer");
        assert_eq!(json["eventType"], "statusChanged");
        assert_eq!(json["payload"]["kind"], "status_changed");
        assert_eq!(json["payload"]["to"], "READY");
        assert!(json["timestamp"].is_string());
    }
}

//! Broadcast channel for device events.
//!
//! ```text
//! ┌──────────────┐
//! │ PrinterSvc   │──┐
//! └──────────────┘  │   ┌──────────────────┐     ┌─────────────┐
//!                   ├──►│  DeviceEventBus  │────►│ status UI   │
//! ┌──────────────┐  │   │  (broadcast)     │────►│ audit log   │
//! │ ScannerSvc   │──┘   └──────────────────┘     └─────────────┘
//! └──────────────┘
//! ```
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and a subscriber that falls behind skips the oldest events.
//!
//! # Examples
//!
//! ```
//! use parkpos_core::{DeviceEventBus, DeviceStatus, EventPayload, HardwareEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = DeviceEventBus::new();
//! let mut events = bus.subscribe();
//!
//! bus.publish(HardwareEvent::printer(EventPayload::StatusChanged {
//!     from: DeviceStatus::Disconnected,
//!     to: DeviceStatus::Ready,
//! }));
//!
//! let event = events.recv().await.unwrap();
//! assert!(matches!(event.payload, EventPayload::StatusChanged { .. }));
//! # }
//! ```

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::constants::EVENT_BUS_CAPACITY;
use crate::event::HardwareEvent;

/// Shared publish/subscribe channel for hardware events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct DeviceEventBus {
    tx: broadcast::Sender<HardwareEvent>,
}

impl DeviceEventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    /// Create a bus that buffers up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: HardwareEvent) {
        trace!(
            device = %event.device_kind,
            event_type = ?event.event_type,
            "Publishing hardware event"
        );
        // No subscribers is not an error for a fire-and-forget bus
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Register a handler that runs for every event on a background task.
    ///
    /// The handler runs until the bus and all its clones are dropped, or
    /// until the returned handle is aborted.
    pub fn subscribe_with<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(HardwareEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
        })
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for DeviceEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a bus subscription.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<HardwareEvent>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once every publisher is gone. Lagging is logged and
    /// skipped rather than surfaced.
    pub async fn recv(&mut self) -> Option<HardwareEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<HardwareEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<HardwareEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

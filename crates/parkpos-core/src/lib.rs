//! Shared vocabulary for the parking lot peripherals.
//!
//! The printer and scanner services both report through the types in this
//! crate: a [`DeviceStatus`] per device, [`HardwareEvent`]s published on the
//! [`DeviceEventBus`], and the typed configuration in [`config`].

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod types;

pub use bus::{DeviceEventBus, EventSubscription};
pub use config::{AppConfig, PrinterConfig, RetryPolicy, ScannerConfig, SymbologyConfig};
pub use error::{Error, Result};
pub use event::{EventPayload, EventType, HardwareEvent};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

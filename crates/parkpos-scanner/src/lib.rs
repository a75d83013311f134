//! Barcode capture for the parking lot cash desk.
//!
//! A keyboard-wedge scanner types a whole code in a few milliseconds; a
//! person needs hundreds. [`ScannerService`] tells the two apart by timing,
//! validates what it captures, and hands input to the operator when the
//! scanner fails to read.
//!
//! ```text
//! ScannerService      await_code() / start_manual_entry() / cancel()
//!   ├─ ScanCapture          keystroke bursts → candidates
//!   ├─ ManualEntryFallback  operator typing with inactivity timeout
//!   ├─ CodeValidator        alphabet, length and check digit
//!   └─ KeystrokeSource      stdin, character device or mock
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use parkpos_core::{DeviceEventBus, ScanSource, ScannerConfig};
//! use parkpos_scanner::ScannerService;
//! use parkpos_scanner::mock::MockScanner;
//!
//! # #[tokio::main]
//! # async fn main() -> parkpos_scanner::Result<()> {
//! let (scanner, handle) = MockScanner::new();
//! let service = ScannerService::start(ScannerConfig::default(), scanner, DeviceEventBus::new());
//!
//! let scan = tokio::spawn({
//!     let service = service.clone();
//!     async move { service.await_code(Duration::from_secs(5)).await }
//! });
//! service
//!     .mode_watch()
//!     .wait_for(|mode| *mode == parkpos_core::ScannerMode::Scanning)
//!     .await
//!     .ok();
//! handle.type_text("T-00099\r");
//!
//! let result = scan.await.expect("scan task")?;
//! assert_eq!(result.source, ScanSource::AutomaticScan);
//! assert_eq!(result.code(), Some("T-00099"));
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod error;
pub mod fallback;
pub mod mock;
pub mod result;
pub mod service;
pub mod source;
pub mod validator;

pub use capture::{Candidate, CaptureEvent, CaptureSettings, DiscardReason, ScanCapture};
pub use error::{Result, ScanError, SourceError, ValidationError};
pub use fallback::{ManualEntryFallback, ManualInput, ManualOutcome};
pub use result::{ScanResult, Validation};
pub use service::ScannerService;
pub use source::{AnyKeystrokeSource, DeviceSource, KeystrokeSource, StdinSource};
pub use validator::CodeValidator;

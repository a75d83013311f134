//! Thermal receipt printing for the parking lot cash desk.
//!
//! # Layers
//!
//! ```text
//! PrinterService      print() / get_status() / test_connection()
//!   ├─ ReceiptRenderer   DocumentKind + fields → ESC/POS bytes
//!   ├─ PrintQueue        priority lanes, retry with backoff, abandonment
//!   └─ DeviceConnection  connect / send / probe with timeouts
//!        └─ Transport    TCP socket, device file or mock
//! ```
//!
//! # Example
//!
//! ```
//! use parkpos_core::{DeviceEventBus, PrinterConfig};
//! use parkpos_printer::mock::MockTransport;
//! use parkpos_printer::{DocumentKind, PrinterService, ReceiptFields};
//!
//! # #[tokio::main]
//! # async fn main() -> parkpos_printer::Result<()> {
//! let (transport, printer) = MockTransport::new();
//! let service = PrinterService::start(PrinterConfig::default(), transport, DeviceEventBus::new());
//!
//! let fields = ReceiptFields::new()
//!     .with("plate", "ABC-123")
//!     .with("code", "T-00099");
//! let job = service.print(DocumentKind::EntryTicket, &fields)?;
//!
//! printer.wait_for_jobs(1).await;
//! assert!(service.pending_jobs().iter().all(|pending| pending.id != job.id));
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod encoding;
pub mod error;
pub mod escpos;
pub mod mock;
pub mod queue;
pub mod renderer;
pub mod service;
pub mod transport;

pub use connection::{Ack, Connected, DeviceConnection, PrinterHealth};
pub use error::{ConnectError, PrinterError, RenderError, Result, SendError};
pub use queue::{DrainReport, DrainStop, JobState, PrintJob, PrintQueue, Priority, QueueStatus};
pub use renderer::{DocumentKind, ReceiptFields, ReceiptRenderer, RenderedReceipt, render};
pub use service::{ConnectionReport, PrinterService};
pub use transport::{AnyTransport, DeviceFileTransport, TcpTransport, Transport};

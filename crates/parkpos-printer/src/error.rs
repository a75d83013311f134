//! Error types for printer operations.
//!
//! Messages are written for the operator at the cash desk. Transport errors
//! are retried by the queue and only reach callers through events; render
//! errors are returned synchronously from `print()`.

use std::io;

/// Result type alias for printer service operations.
pub type Result<T> = std::result::Result<T, PrinterError>;

/// Failure to establish a link with the printer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Nothing answered at the configured target.
    #[error("Impresora inalcanzable en {target}: {message}")]
    Unreachable { target: String, message: String },

    /// The handshake did not finish in time.
    #[error("Tiempo de conexión agotado tras {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The target actively rejected the connection.
    #[error("La impresora rechazó la conexión en {target}")]
    Refused { target: String },
}

impl ConnectError {
    pub fn unreachable(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn refused(target: impl Into<String>) -> Self {
        Self::Refused {
            target: target.into(),
        }
    }

    /// Classify an I/O error raised while opening `target`.
    pub fn from_io(target: &str, error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Self::refused(target),
            io::ErrorKind::TimedOut => Self::Timeout { duration_ms: 0 },
            _ => Self::unreachable(target, error.to_string()),
        }
    }
}

/// Failure to deliver bytes to a linked printer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// `send()` called without an open link.
    #[error("La impresora no está conectada")]
    NotConnected,

    /// The write did not complete in time.
    #[error("Tiempo de envío agotado tras {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The link broke mid-write.
    #[error("Conexión con la impresora perdida: {message}")]
    LinkLost { message: String },

    /// The printer accepted the link but refused the data.
    #[error("Fallo al enviar a la impresora: {message}")]
    Rejected { message: String },

    /// The printer reported paper end before the job was sent.
    #[error("La impresora no tiene papel")]
    OutOfPaper,

    /// The printer reported a blocking error (cover open, cutter jam).
    #[error("La impresora informa de un error: {message}")]
    Fault { message: String },
}

impl SendError {
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn link_lost(message: impl Into<String>) -> Self {
        Self::LinkLost {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// Classify an I/O error raised by a write.
    ///
    /// Errors that mean the peer is gone become [`SendError::LinkLost`];
    /// everything else is a rejection on a still-open link.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::link_lost(error.to_string()),
            io::ErrorKind::TimedOut => Self::Timeout { duration_ms: 0 },
            _ => Self::rejected(error.to_string()),
        }
    }

    /// Whether the link is unusable after this error.
    pub fn drops_link(&self) -> bool {
        matches!(self, Self::NotConnected | Self::LinkLost { .. })
    }

    /// Whether this failure consumes one of the job's attempts.
    ///
    /// Jobs blocked by a missing link or a printer-side condition keep
    /// their budget.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(
            self,
            Self::NotConnected | Self::OutOfPaper | Self::Fault { .. }
        )
    }
}

/// Bad input to the receipt renderer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// A field required by the document kind is absent or blank.
    #[error("Falta el campo obligatorio '{field}' para {document}")]
    MissingField {
        document: &'static str,
        field: &'static str,
    },

    /// The document kind name is not known.
    #[error("Tipo de documento desconocido: {0}")]
    UnknownDocument(String),

    /// A value printed as a barcode holds characters the symbology lacks.
    #[error("El campo '{field}' contiene caracteres no válidos para Code 39: '{chars}'")]
    UnencodableBarcode { field: &'static str, chars: String },
}

/// Errors returned by the printer service API.
#[derive(Debug, thiserror::Error)]
pub enum PrinterError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    /// No abandoned job with this id is remembered.
    #[error("No existe un trabajo abandonado con id {0}")]
    UnknownJob(String),

    /// The service task is no longer running.
    #[error("El servicio de impresión está detenido")]
    ServiceStopped,

    /// The printer is not in a state that allows the operation.
    #[error("Impresora no disponible: {0}")]
    Unavailable(String),

    /// The service task panicked.
    #[error("La tarea del servicio de impresión terminó de forma anómala: {0}")]
    TaskFailed(String),
}

//! Error types for scanner operations.
//!
//! [`ValidationError`] is part of a successful [`ScanResult`](crate::ScanResult)
//! rather than a failure of the call; [`ScanError`] is what `await_code()` and
//! `start_manual_entry()` return when no code was produced at all.

use std::io;

/// Result type alias for scanner service operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Why a code does not match the configured symbology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Nothing left after trimming.
    #[error("El código está vacío")]
    EmptyInput,

    /// Characters outside the symbology alphabet.
    #[error("El código contiene caracteres no válidos: {chars}")]
    InvalidCharacters { chars: String },

    #[error("El código tiene {len} caracteres; se esperaban entre {min} y {max}")]
    LengthOutOfRange { len: usize, min: usize, max: usize },

    /// The trailing check character does not match the payload.
    #[error("Dígito de control incorrecto: se esperaba '{expected}' y se leyó '{found}'")]
    ChecksumMismatch { expected: char, found: char },
}

impl ValidationError {
    /// Stable reason code for logs and events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "EMPTY_INPUT",
            Self::InvalidCharacters { .. } => "INVALID_CHARACTERS",
            Self::LengthOutOfRange { .. } => "LENGTH_OUT_OF_RANGE",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
        }
    }
}

/// Failure of the keystroke source feeding the scanner.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The input could not be opened.
    #[error("Lector no disponible en {source_name}: {message}")]
    Unavailable {
        source_name: String,
        message: String,
    },

    /// The input reached end of stream.
    #[error("El lector {source_name} se desconectó")]
    Disconnected { source_name: String },

    #[error("Error de lectura del escáner: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {
    pub fn unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn disconnected(source_name: impl Into<String>) -> Self {
        Self::Disconnected {
            source_name: source_name.into(),
        }
    }
}

/// Why a scan request produced no code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// Nothing was scanned in time. Offer manual entry next.
    #[error("No se leyó ningún código en {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// `cancel()` was called while the request was pending.
    #[error("Lectura cancelada")]
    Cancelled,

    /// Manual entry took over input while a scan was pending.
    #[error("La lectura fue reemplazada por la entrada manual")]
    Preempted,

    /// Another request already owns scanner input.
    #[error("El escáner ya está atendiendo otra lectura")]
    Busy,

    /// The operator stopped typing for too long.
    #[error("Entrada manual abandonada tras {idle_ms}ms sin actividad")]
    ManualEntryTimeout { idle_ms: u64 },

    /// The service task is no longer running.
    #[error("El servicio del escáner está detenido")]
    ServiceStopped,

    /// The service task panicked.
    #[error("La tarea del servicio del escáner terminó de forma anómala: {0}")]
    TaskFailed(String),
}

impl ScanError {
    pub fn timeout(waited_ms: u64) -> Self {
        Self::Timeout { waited_ms }
    }

    /// Whether the caller should offer manual entry as the next step.
    pub fn suggests_manual_entry(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_reason_codes() {
        assert_eq!(ValidationError::EmptyInput.code(), "EMPTY_INPUT");
        assert_eq!(
            ValidationError::LengthOutOfRange { len: 3, min: 4, max: 20 }.code(),
            "LENGTH_OUT_OF_RANGE"
        );
    }

    #[test]
    fn test_messages_are_spanish() {
        assert_eq!(
            ValidationError::LengthOutOfRange { len: 3, min: 4, max: 20 }.to_string(),
            "El código tiene 3 caracteres; se esperaban entre 4 y 20"
        );
        assert_eq!(
            ScanError::timeout(1000).to_string(),
            "No se leyó ningún código en 1000ms"
        );
        assert!(ScanError::timeout(1000).suggests_manual_entry());
        assert!(!ScanError::Cancelled.suggests_manual_entry());
    }
}

use chrono::{DateTime, Utc};
use parkpos_core::{ScanQuality, ScanSource};

use crate::error::ValidationError;

/// Outcome of validating a captured code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Normalised code accepted by the symbology.
    Valid(String),
    Invalid(ValidationError),
}

impl From<Result<String, ValidationError>> for Validation {
    fn from(result: Result<String, ValidationError>) -> Self {
        match result {
            Ok(code) => Self::Valid(code),
            Err(e) => Self::Invalid(e),
        }
    }
}

/// One completed capture or manual entry.
///
/// Returned to the caller even when validation failed, so the reason can be
/// shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub source: ScanSource,
    /// Characters exactly as received.
    pub raw: String,
    pub quality: ScanQuality,
    pub validation: Validation,
    pub captured_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn is_valid(&self) -> bool {
        matches!(self.validation, Validation::Valid(_))
    }

    /// The normalised code, if it passed validation.
    pub fn code(&self) -> Option<&str> {
        match &self.validation {
            Validation::Valid(code) => Some(code),
            Validation::Invalid(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ValidationError> {
        match &self.validation {
            Validation::Valid(_) => None,
            Validation::Invalid(e) => Some(e),
        }
    }
}

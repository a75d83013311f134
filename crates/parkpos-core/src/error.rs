//! Error types shared by the parking peripherals.
//!
//! Device-specific failures (transport, rendering, scanning) live in their own
//! crates. This module only covers what every service needs: configuration
//! problems and invariant violations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Error de configuración: {0}")]
    Config(String),

    #[error("No se pudo leer la configuración: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Logic errors
    #[error("Transición de estado inválida de {from} a {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invariante violada: {0}")]
    InvariantViolation(String),

    // IO errors
    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid state transition error from any displayable states.
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

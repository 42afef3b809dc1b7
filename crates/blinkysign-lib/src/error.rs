//! Unified error type for the blinkysign-lib crate.
//!
//! [`BlinkyError`] wraps LED strip errors ([`StripError`]) and the
//! command-surface error kinds (`Validation`, `Transport`, `Config`).
//! `From` impls allow `?` to propagate across module boundaries.

use std::fmt;

use crate::led::StripError;

/// Unified error type for blinkysign-lib operations.
#[derive(Debug)]
pub enum BlinkyError {
    /// Malformed or missing command fields. No state was changed.
    Validation(String),
    /// LED strip initialization or write failure.
    Hardware(StripError),
    /// HTTP or MQTT transport failure.
    Transport(String),
    /// Standard I/O error (sockets, GPIO files, config persistence).
    Io(std::io::Error),
    /// Configuration error.
    Config(String),
    /// JSON encoding or decoding error.
    Json(serde_json::Error),
}

impl BlinkyError {
    /// Message suitable for a client-facing error reply.
    ///
    /// Validation errors carry a message written for the caller, so it is
    /// returned without the `Validation error:` prefix.
    pub fn client_message(&self) -> String {
        match self {
            BlinkyError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for BlinkyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlinkyError::Validation(e) => write!(f, "Validation error: {e}"),
            BlinkyError::Hardware(e) => write!(f, "{e}"),
            BlinkyError::Transport(e) => write!(f, "Transport error: {e}"),
            BlinkyError::Io(e) => write!(f, "I/O error: {e}"),
            BlinkyError::Config(e) => write!(f, "Config error: {e}"),
            BlinkyError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for BlinkyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlinkyError::Hardware(e) => Some(e),
            BlinkyError::Io(e) => Some(e),
            BlinkyError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StripError> for BlinkyError {
    fn from(e: StripError) -> Self {
        BlinkyError::Hardware(e)
    }
}

impl From<std::io::Error> for BlinkyError {
    fn from(e: std::io::Error) -> Self {
        BlinkyError::Io(e)
    }
}

impl From<serde_json::Error> for BlinkyError {
    fn from(e: serde_json::Error) -> Self {
        BlinkyError::Json(e)
    }
}

/// Crate-level Result alias using [`BlinkyError`].
pub type Result<T> = std::result::Result<T, BlinkyError>;

//! Error taxonomy for the engine.
//!
//! Every variant carries a stable `code()` identifier (e.g.
//! `ATTENDANCE_WINDOW_VIOLATION`) alongside a human message, so callers at
//! the HTTP edge can surface both without re-deriving one from the other.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    #[error("{message}")]
    Auth {
        code: &'static str,
        message: String,
    },

    #[error("{message}")]
    State {
        code: &'static str,
        message: String,
    },

    #[error("card hash mismatch: stored hash no longer matches recomputed hash")]
    Integrity { card_id: uuid::Uuid },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("fatal data bug: {message}")]
    DataBug { message: String },
}

impl CoreError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn state(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::State {
            code,
            message: message.into(),
        }
    }

    pub fn auth(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Auth {
            code,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CoreError::Transient {
            message: message.into(),
        }
    }

    /// Stable identifier suitable for a user-visible API response.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { code, .. } => code,
            CoreError::Auth { code, .. } => code,
            CoreError::State { code, .. } => code,
            CoreError::Integrity { .. } => "CARD_TAMPERED",
            CoreError::Transient { .. } => "TRANSIENT_ERROR",
            CoreError::DataBug { .. } => "DATA_BUG",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

//! Domain errors surfaced by the service layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Bad input. `field` names the offending parameter or body field.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// The user must do something first (e.g. record a weight).
    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// The field a validation error is keyed on, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

//! Error taxonomy for the reconciliation core.

use thiserror::Error;

/// Errors surfaced by core operations.
///
/// `Storage` is the only retryable variant — scheduler iterations retry
/// it with bounded backoff; everything else propagates to the caller as is.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Alert {id} is already resolved")]
    AlreadyResolved { id: i64 },

    #[error("Dedup-key conflict creating alert: {message}")]
    Conflict { message: String },

    #[error("Transient storage error: {message}")]
    Storage { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn already_resolved(id: i64) -> Self {
        Self::AlreadyResolved { id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether a scheduler iteration should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

//! Error types for the leave lifecycle and the delivery subsystem.

use std::time::Duration;

use thiserror::Error;

/// Lifecycle result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the lifecycle engine and the stores.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

/// Errors produced inside the delivery subsystem. None of these ever
/// propagate into a lifecycle operation.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Network or transport failure; the attempt is retried.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("send attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Retries exhausted; the notification is parked as Failed.
    #[error("delivery failed permanently after {attempts} attempts: {message}")]
    Permanent { attempts: u32, message: String },

    #[error("delivery queue is not accepting tasks")]
    QueueClosed,

    #[error("delivery queue is full")]
    QueueFull,

    #[error("delivery queue is already running")]
    AlreadyRunning,

    #[error("shutdown grace period elapsed with {undrained} task(s) undrained")]
    ShutdownTimeout { undrained: usize },

    #[error(transparent)]
    Repository(#[from] Error),
}

impl DeliveryError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

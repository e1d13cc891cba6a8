//! Domain errors for the fixloop control loop.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur while persisting or validating
/// reliability data.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Reliability event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Run snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Unknown reliability layer: {0}")]
    UnknownLayer(String),

    #[error("Unknown threshold kind: {0}")]
    UnknownThresholdKind(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream was not at the version the writer observed when it loaded
    /// the aggregate.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: String,
        expected: Version,
        actual: Version,
    },

    /// The transaction was already committed or rolled back.
    #[error("Transaction already {0}")]
    TransactionClosed(&'static str),

    /// The caller cancelled the operation before the store finished it.
    #[error("Event store operation cancelled")]
    Cancelled,

    /// The backing store could not serve the request.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Builds a conflict error for any displayable identifier.
    pub fn conflict(
        aggregate_id: &impl std::fmt::Display,
        expected: Version,
        actual: Version,
    ) -> Self {
        Self::ConcurrencyConflict {
            aggregate_id: aggregate_id.to_string(),
            expected,
            actual,
        }
    }

    /// Returns true if this error is an optimistic concurrency rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

//! Projection error types.

use thiserror::Error;

/// Errors raised while feeding events to projections.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Reading the committed log failed.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An event payload did not decode into the shape a projection expects.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A projection refused an event.
    #[error("Projection {projection} rejected event {event_type}: {reason}")]
    Rejected {
        projection: &'static str,
        event_type: String,
        reason: String,
    },

    /// Delivery stopped because the caller cancelled.
    #[error("Projection delivery was cancelled")]
    Cancelled,
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

//! Error types for the command pipeline.

use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Boxed error returned by command handlers and event consumers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`CommandProcessor::process`](crate::CommandProcessor::process).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command failed its own precondition check. Nothing ran.
    #[error("Invalid command {command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },

    /// No handler is registered for the command's runtime type.
    #[error("No handler registered for command {command}")]
    UnhandledCommand { command: &'static str },

    /// An aggregate stream moved past the version the handler observed.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: String,
        expected: Version,
        actual: Version,
    },

    /// The caller cancelled the invocation at a checkpoint.
    #[error("Command processing cancelled")]
    Cancelled,

    /// A handler rejected the command.
    #[error("Command handler failed: {0}")]
    Handler(#[source] BoxError),

    /// The event store failed for a reason other than a conflict.
    #[error("Event store error: {0}")]
    Store(#[source] EventStoreError),

    /// The event dispatcher failed.
    #[error("Event dispatch failed: {0}")]
    Dispatch(#[source] DispatchError),

    /// Rolling back after `original` failed as well.
    #[error("Rollback failed ({rollback}) after: {original}")]
    RollbackFailed {
        #[source]
        original: Box<ProcessError>,
        rollback: EventStoreError,
    },
}

impl ProcessError {
    /// Returns true if this error is an optimistic concurrency rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns the failure that triggered a rollback, or `self` otherwise.
    pub fn root(&self) -> &ProcessError {
        match self {
            Self::RollbackFailed { original, .. } => original.root(),
            other => other,
        }
    }
}

impl From<EventStoreError> for ProcessError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            EventStoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

impl From<DispatchError> for ProcessError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Cancelled => Self::Cancelled,
            other => Self::Dispatch(other),
        }
    }
}

/// Errors raised while delivering a batch of committed events.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A subscriber refused the batch.
    #[error("Subscriber rejected events: {0}")]
    Rejected(String),

    /// An event consumer failed while applying the batch.
    #[error("Event consumer failed: {0}")]
    Consumer(#[source] BoxError),

    /// The caller cancelled the dispatch.
    #[error("Event dispatch cancelled")]
    Cancelled,
}

/// Errors raised by the unit of work.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitOfWorkError {
    /// An aggregate with the same identifier is already tracked.
    #[error("Aggregate {aggregate_id} is already tracked by this unit of work")]
    AlreadyTracked { aggregate_id: String },

    /// The tracked aggregate is not of the requested type.
    #[error("Aggregate {aggregate_id} is not a {expected}")]
    TypeMismatch {
        aggregate_id: String,
        expected: &'static str,
    },
}

/// Errors raised when assembling a [`CommandProcessor`](crate::CommandProcessor).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Command processor is missing its {0}")]
    MissingComponent(&'static str),
}

/// Result type for command processing.
pub type Result<T> = std::result::Result<T, ProcessError>;

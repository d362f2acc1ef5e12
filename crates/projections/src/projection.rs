//! Core projection trait and position tracking.

use std::collections::HashSet;

use async_trait::async_trait;
use event_store::{EventEnvelope, EventId};

use crate::Result;

/// How far a projection has followed the committed log.
///
/// `events_processed` counts log entries catch-up has accounted for, whether
/// it applied them or found them already applied. Events applied live, ahead
/// of the log, are remembered by id in `unconfirmed` until catch-up reaches
/// their entry. Ids that never show up in the log belong to rolled-back
/// batches; only [`Projection::reset`] clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_processed: u64,
    pub unconfirmed: HashSet<EventId>,
}

impl ProjectionPosition {
    /// Creates a position that has seen nothing.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Whether the log entry at `index` (1-based) is already accounted for.
    pub fn has_seen(&self, index: u64) -> bool {
        index <= self.events_processed
    }

    /// Records an event applied outside log replay.
    pub fn record_live(&mut self, event_id: EventId) {
        self.unconfirmed.insert(event_id);
    }

    /// Accounts for the next log entry.
    ///
    /// Returns true if the entry still has to be applied, false if it was
    /// already applied live.
    pub fn confirm(&mut self, event_id: &EventId) -> bool {
        self.events_processed += 1;
        !self.unconfirmed.remove(event_id)
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.events_processed)
    }
}

/// Folds events into a read model.
///
/// `handle` only applies the event. Positions are moved by
/// [`ProjectionDispatcher`](crate::ProjectionDispatcher) through
/// `set_position`.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Applies a single event.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    /// Returns the current position of this projection.
    async fn position(&self) -> ProjectionPosition;

    /// Stores the position reached after applying or skipping events.
    async fn set_position(&self, position: ProjectionPosition);

    /// Drops all projected state and rewinds to [`ProjectionPosition::zero`].
    async fn reset(&self) -> Result<()>;
}

//! Aggregates touched during one command invocation.

use std::collections::HashMap;

use event_store::{AggregateKey, Version};

use crate::aggregate::{AggregateRoot, TrackedAggregate};
use crate::error::UnitOfWorkError;

/// Events of one changed aggregate, as handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChanges<I, E> {
    pub aggregate_id: I,
    pub aggregate_type: &'static str,
    pub expected_version: Version,
    pub events: Vec<E>,
}

/// Tracks the aggregates loaded or created while one command is handled.
///
/// Aggregates are kept in registration order, and that order is the order in
/// which their events are persisted and dispatched. Each identifier can be
/// tracked once.
pub struct UnitOfWork<I, E> {
    entries: Vec<Box<dyn TrackedAggregate<I, E>>>,
    index: HashMap<I, usize>,
}

impl<I, E> UnitOfWork<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Starts tracking an aggregate and hands it back for mutation.
    pub fn attach<A>(&mut self, aggregate: A) -> Result<&mut A, UnitOfWorkError>
    where
        A: AggregateRoot<Id = I, Event = E>,
    {
        let aggregate_id = aggregate.id().clone();
        if self.index.contains_key(&aggregate_id) {
            return Err(UnitOfWorkError::AlreadyTracked {
                aggregate_id: aggregate_id.to_string(),
            });
        }

        tracing::trace!(
            aggregate_id = %aggregate_id,
            aggregate_type = AggregateRoot::aggregate_type(&aggregate),
            "Tracking aggregate"
        );

        let position = self.entries.len();
        self.entries.push(Box::new(aggregate));
        self.index.insert(aggregate_id.clone(), position);

        self.entries[position]
            .as_dyn_any_mut()
            .downcast_mut::<A>()
            .ok_or_else(|| UnitOfWorkError::TypeMismatch {
                aggregate_id: aggregate_id.to_string(),
                expected: std::any::type_name::<A>(),
            })
    }

    /// Returns true if an aggregate with this identifier is tracked.
    pub fn contains(&self, aggregate_id: &I) -> bool {
        self.index.contains_key(aggregate_id)
    }

    /// Returns the tracked aggregate, if it exists and is an `A`.
    pub fn get<A>(&self, aggregate_id: &I) -> Option<&A>
    where
        A: AggregateRoot<Id = I, Event = E>,
    {
        let position = *self.index.get(aggregate_id)?;
        self.entries[position].as_dyn_any().downcast_ref::<A>()
    }

    /// Returns the tracked aggregate mutably, if it exists and is an `A`.
    pub fn get_mut<A>(&mut self, aggregate_id: &I) -> Option<&mut A>
    where
        A: AggregateRoot<Id = I, Event = E>,
    {
        let position = *self.index.get(aggregate_id)?;
        self.entries[position].as_dyn_any_mut().downcast_mut::<A>()
    }

    /// Number of tracked aggregates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true iff at least one tracked aggregate has pending events.
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|entry| entry.pending_count() > 0)
    }

    /// Aggregates with pending events, in registration order.
    pub fn changes(&self) -> impl Iterator<Item = &(dyn TrackedAggregate<I, E> + 'static)> {
        self.entries
            .iter()
            .filter(|entry| entry.pending_count() > 0)
            .map(|entry| entry.as_ref())
    }

    /// Copies the pending events of every changed aggregate, in registration
    /// order, leaving the aggregates untouched.
    pub fn staged_changes(&self) -> Vec<PendingChanges<I, E>>
    where
        E: Clone,
    {
        self.changes()
            .map(|entry| PendingChanges {
                aggregate_id: entry.aggregate_id().clone(),
                aggregate_type: entry.aggregate_type(),
                expected_version: entry.expected_version(),
                events: entry.pending().to_vec(),
            })
            .collect()
    }

    /// Drains the pending events of every changed aggregate, in registration
    /// order.
    ///
    /// The processor calls this only once the events are committed.
    pub fn take_changes(&mut self) -> Vec<PendingChanges<I, E>> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.pending_count() > 0)
            .map(|entry| PendingChanges {
                aggregate_id: entry.aggregate_id().clone(),
                aggregate_type: entry.aggregate_type(),
                expected_version: entry.expected_version(),
                events: entry.take_pending(),
            })
            .collect()
    }
}

impl<I, E> Default for UnitOfWork<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I: AggregateKey, E> std::fmt::Debug for UnitOfWork<I, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked", &self.entries.len())
            .field("ids", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

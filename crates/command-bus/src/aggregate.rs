//! Aggregate root contract and the erased view the unit of work tracks.

use std::any::Any;

use event_store::{AggregateKey, Version};

/// Trait for aggregate roots handled by the command pipeline.
///
/// An aggregate is the unit of consistency: it is the only producer of events
/// for its identifier. The pipeline needs three things from it:
/// - its identifier
/// - the stream version observed when it was loaded or created
/// - the ordered events recorded since then and not yet persisted
///
/// How the aggregate applies events to its own state is up to the
/// implementation.
pub trait AggregateRoot: Send + Sync + 'static {
    /// Identifier type of the aggregate's event stream.
    type Id: AggregateKey;

    /// Event type the aggregate records.
    type Event: Send + Sync + 'static;

    /// Returns the aggregate type name.
    fn aggregate_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the aggregate's identifier.
    fn id(&self) -> &Self::Id;

    /// Returns the stream version observed at load or creation time.
    ///
    /// New aggregates report [`Version::initial`].
    fn expected_version(&self) -> Version;

    /// Returns the events recorded but not yet persisted, oldest first.
    fn pending_events(&self) -> &[Self::Event];

    /// Removes and returns the pending events, oldest first.
    fn take_pending_events(&mut self) -> Vec<Self::Event>;

    /// Returns true if the aggregate has recorded events.
    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}

/// Ordered buffer of events an aggregate recorded but has not persisted.
///
/// Aggregates embed one and forward [`AggregateRoot::pending_events`] and
/// [`AggregateRoot::take_pending_events`] to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvents<E> {
    events: Vec<E>,
}

impl<E> PendingEvents<E> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Appends an event after the ones already recorded.
    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    /// Drains the buffer, preserving order.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> Default for PendingEvents<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased aggregate as tracked by the unit of work.
///
/// Implemented for every [`AggregateRoot`]; the downcast accessors recover the
/// concrete type for handlers.
pub trait TrackedAggregate<I, E>: Send + Sync {
    fn aggregate_id(&self) -> &I;

    fn aggregate_type(&self) -> &'static str;

    fn expected_version(&self) -> Version;

    fn pending(&self) -> &[E];

    fn pending_count(&self) -> usize;

    fn take_pending(&mut self) -> Vec<E>;

    fn as_dyn_any(&self) -> &dyn Any;

    fn as_dyn_any_mut(&mut self) -> &mut dyn Any;
}

impl<A: AggregateRoot> TrackedAggregate<A::Id, A::Event> for A {
    fn aggregate_id(&self) -> &A::Id {
        self.id()
    }

    fn aggregate_type(&self) -> &'static str {
        AggregateRoot::aggregate_type(self)
    }

    fn expected_version(&self) -> Version {
        AggregateRoot::expected_version(self)
    }

    fn pending(&self) -> &[A::Event] {
        self.pending_events()
    }

    fn pending_count(&self) -> usize {
        self.pending_events().len()
    }

    fn take_pending(&mut self) -> Vec<A::Event> {
        self.take_pending_events()
    }

    fn as_dyn_any(&self) -> &dyn Any {
        self
    }

    fn as_dyn_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

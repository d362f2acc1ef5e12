use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{AggregateKey, EventStoreError, Result, Version};

/// Identifies the command invocation a transaction is opened for.
///
/// Stores may use it for tracing or to tag the rows they write.
#[derive(Debug, Clone)]
pub struct TransactionScope {
    /// Unique id of the command invocation.
    pub invocation_id: Uuid,

    /// Type name of the command being processed.
    pub command_name: &'static str,
}

impl TransactionScope {
    /// Creates a scope for the given invocation.
    pub fn new(invocation_id: Uuid, command_name: &'static str) -> Self {
        Self {
            invocation_id,
            command_name,
        }
    }
}

/// Lifecycle state of a store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    /// Fails with [`EventStoreError::TransactionClosed`] unless still open.
    pub fn ensure_open(self) -> Result<()> {
        match self {
            Self::Open => Ok(()),
            Self::Committed => Err(EventStoreError::TransactionClosed("committed")),
            Self::RolledBack => Err(EventStoreError::TransactionClosed("rolled back")),
        }
    }
}

/// Atomic write scope for one command invocation.
///
/// Events staged with [`store_events`](Self::store_events) become visible to
/// readers only after [`commit`](Self::commit). A transaction is released
/// exactly once, by commit or rollback; dropping an open transaction discards
/// everything it staged.
#[async_trait]
pub trait EventStoreTransaction<I, E>: Send
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Stages events for one aggregate stream.
    ///
    /// Fails with `ConcurrencyConflict` if the stream is not at
    /// `expected_version`. Returns the stream version after the append.
    async fn store_events(
        &mut self,
        aggregate_id: &I,
        expected_version: Version,
        events: &[E],
        cancel: &CancellationToken,
    ) -> Result<Version>;

    /// Makes every staged append durable and visible, atomically.
    async fn commit(&mut self) -> Result<()>;

    /// Discards every staged append.
    async fn rollback(&mut self) -> Result<()>;

    /// Returns the current lifecycle state.
    fn status(&self) -> TransactionStatus;
}

/// Write side of an event store.
///
/// All implementations must be thread-safe; the store is the only resource
/// shared between concurrent command invocations.
#[async_trait]
pub trait EventStore<I, E>: Send + Sync
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Opens a transaction scoped to one command invocation.
    async fn begin_transaction(
        &self,
        scope: &TransactionScope,
    ) -> Result<Box<dyn EventStoreTransaction<I, E>>>;
}

/// A stream of committed events paired with their aggregate id.
pub type EventStream<I, E> = Pin<Box<dyn Stream<Item = Result<(I, E)>> + Send>>;

/// Read side of an event store.
#[async_trait]
pub trait EventReader<I, E>: Send + Sync
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Returns the committed events of one stream, oldest first.
    async fn read_stream(&self, aggregate_id: &I) -> Result<Vec<E>>;

    /// Returns the committed version of one stream.
    ///
    /// A stream that was never written is at [`Version::initial`].
    async fn stream_version(&self, aggregate_id: &I) -> Result<Version>;

    /// Streams every committed event in commit order.
    async fn read_all(&self) -> Result<EventStream<I, E>>;
}

/// Rejects an append whose expected version does not match the stream.
pub fn check_expected_version<I: AggregateKey>(
    aggregate_id: &I,
    expected: Version,
    actual: Version,
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(EventStoreError::conflict(aggregate_id, expected, actual))
    }
}

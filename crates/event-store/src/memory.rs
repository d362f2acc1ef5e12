use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::store::{
    EventReader, EventStore, EventStoreTransaction, EventStream, TransactionScope,
    TransactionStatus, check_expected_version,
};
use crate::{AggregateId, AggregateKey, EventEnvelope, EventStoreError, Result, Version};

struct StoreState<I, E> {
    streams: HashMap<I, Vec<E>>,
    log: Vec<(I, E)>,
}

impl<I: AggregateKey, E> StoreState<I, E> {
    fn version_of(&self, aggregate_id: &I) -> Version {
        let len = self.streams.get(aggregate_id).map_or(0, Vec::len);
        Version::initial().advance(len)
    }
}

/// In-memory transactional event store.
///
/// Streams live behind a single `RwLock`; a transaction stages appends
/// privately and re-validates every expected version under the write lock at
/// commit, so of two transactions racing on the same stream version exactly
/// one commits.
pub struct InMemoryEventStore<I = AggregateId, E = EventEnvelope> {
    state: Arc<RwLock<StoreState<I, E>>>,
}

impl<I, E> Clone for InMemoryEventStore<I, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<I, E> Default for InMemoryEventStore<I, E> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                streams: HashMap::new(),
                log: Vec::new(),
            })),
        }
    }
}

impl<I, E> InMemoryEventStore<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of committed events.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.log.len()
    }

    /// Returns the number of streams with at least one committed event.
    pub async fn stream_count(&self) -> usize {
        self.state.read().await.streams.len()
    }

    /// Clears all streams.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.streams.clear();
        state.log.clear();
    }
}

#[async_trait]
impl<I, E> EventStore<I, E> for InMemoryEventStore<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    async fn begin_transaction(
        &self,
        scope: &TransactionScope,
    ) -> Result<Box<dyn EventStoreTransaction<I, E>>> {
        tracing::trace!(invocation_id = %scope.invocation_id, "in-memory transaction opened");
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            status: TransactionStatus::Open,
        }))
    }
}

#[async_trait]
impl<I, E> EventReader<I, E> for InMemoryEventStore<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    async fn read_stream(&self, aggregate_id: &I) -> Result<Vec<E>> {
        let state = self.state.read().await;
        Ok(state.streams.get(aggregate_id).cloned().unwrap_or_default())
    }

    async fn stream_version(&self, aggregate_id: &I) -> Result<Version> {
        Ok(self.state.read().await.version_of(aggregate_id))
    }

    async fn read_all(&self) -> Result<EventStream<I, E>> {
        use futures_util::stream;

        let events = self.state.read().await.log.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

struct StagedAppend<I, E> {
    aggregate_id: I,
    expected_version: Version,
    events: Vec<E>,
}

/// Transaction handed out by [`InMemoryEventStore`].
pub struct InMemoryTransaction<I, E> {
    state: Arc<RwLock<StoreState<I, E>>>,
    staged: Vec<StagedAppend<I, E>>,
    status: TransactionStatus,
}

impl<I: AggregateKey, E> InMemoryTransaction<I, E> {
    /// Version the stream will be at once this transaction's own appends land.
    fn staged_version(&self, aggregate_id: &I) -> Option<Version> {
        self.staged
            .iter()
            .rev()
            .find(|append| &append.aggregate_id == aggregate_id)
            .map(|append| append.expected_version.advance(append.events.len()))
    }
}

#[async_trait]
impl<I, E> EventStoreTransaction<I, E> for InMemoryTransaction<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    async fn store_events(
        &mut self,
        aggregate_id: &I,
        expected_version: Version,
        events: &[E],
        cancel: &CancellationToken,
    ) -> Result<Version> {
        self.status.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(EventStoreError::Cancelled);
        }

        let current = match self.staged_version(aggregate_id) {
            Some(version) => version,
            None => self.state.read().await.version_of(aggregate_id),
        };
        check_expected_version(aggregate_id, expected_version, current)?;

        self.staged.push(StagedAppend {
            aggregate_id: aggregate_id.clone(),
            expected_version,
            events: events.to_vec(),
        });

        Ok(expected_version.advance(events.len()))
    }

    async fn commit(&mut self) -> Result<()> {
        self.status.ensure_open()?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        // Streams may have moved since staging; validate everything before
        // applying anything.
        {
            let mut versions: HashMap<&I, Version> = HashMap::new();
            for append in &self.staged {
                let current = *versions
                    .entry(&append.aggregate_id)
                    .or_insert_with(|| state.version_of(&append.aggregate_id));
                check_expected_version(&append.aggregate_id, append.expected_version, current)?;
                versions.insert(&append.aggregate_id, current.advance(append.events.len()));
            }
        }

        let mut committed = 0_u64;
        for append in std::mem::take(&mut self.staged) {
            let stream = state.streams.entry(append.aggregate_id.clone()).or_default();
            for event in append.events {
                stream.push(event.clone());
                state.log.push((append.aggregate_id.clone(), event));
                committed += 1;
            }
        }

        self.status = TransactionStatus::Committed;
        metrics::counter!("event_store_events_committed_total").increment(committed);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.status.ensure_open()?;
        self.staged.clear();
        self.status = TransactionStatus::RolledBack;
        Ok(())
    }

    fn status(&self) -> TransactionStatus {
        self.status
    }
}

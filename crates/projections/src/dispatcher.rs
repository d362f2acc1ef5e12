//! Delivers event batches to projections, live or from the committed log.

use std::sync::Arc;

use async_trait::async_trait;
use command_bus::{DispatchError, EventDispatcher};
use common::AggregateId;
use event_store::{EventEnvelope, EventReader};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::Projection;

/// Feeds events to a fixed set of projections.
///
/// As an [`EventDispatcher`] it applies every batch the command pipeline
/// hands it before the transaction commits, so a failing projection rolls the
/// command back. Live events are remembered by id, so [`catch_up`] skips
/// their log entries instead of applying them twice. Effects of a batch that
/// was later rolled back stay in the read model until [`rebuild`].
///
/// [`catch_up`]: ProjectionDispatcher::catch_up
/// [`rebuild`]: ProjectionDispatcher::rebuild
#[derive(Clone, Default)]
pub struct ProjectionDispatcher {
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a projection; batches are applied in registration order.
    pub fn register(&mut self, projection: Arc<dyn Projection>) -> &mut Self {
        self.projections.push(projection);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.register(projection);
        self
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Applies a batch to every projection, one event at a time.
    ///
    /// The batch is not in the committed log yet; positions only record the
    /// event ids.
    #[tracing::instrument(skip(self, events, cancel), fields(events = events.len()))]
    pub async fn apply(&self, events: &[EventEnvelope], cancel: &CancellationToken) -> Result<()> {
        for event in events {
            if cancel.is_cancelled() {
                return Err(ProjectionError::Cancelled);
            }
            for projection in &self.projections {
                projection.handle(event).await?;
                let mut position = projection.position().await;
                position.record_live(event.event_id);
                projection.set_position(position).await;
                metrics::counter!("projections_events_processed", "projection" => projection.name())
                    .increment(1);
            }
        }
        Ok(())
    }

    /// Replays the committed log from each projection's position.
    ///
    /// Entries a projection already applied live are skipped; every other
    /// entry past its position is applied. Returns the number of log entries
    /// read.
    #[tracing::instrument(skip_all)]
    pub async fn catch_up(
        &self,
        reader: &dyn EventReader<AggregateId, EventEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut stream = reader.read_all().await?;
        let mut index: u64 = 0;

        while let Some(entry) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ProjectionError::Cancelled);
            }
            let (_, event) = entry?;
            index += 1;

            for projection in &self.projections {
                let mut position = projection.position().await;
                if position.has_seen(index) {
                    continue;
                }
                if position.confirm(&event.event_id) {
                    projection.handle(&event).await?;
                    metrics::counter!("projections_events_processed", "projection" => projection.name())
                        .increment(1);
                }
                projection.set_position(position).await;
            }
        }

        for projection in &self.projections {
            let unconfirmed = projection.position().await.unconfirmed.len();
            if unconfirmed > 0 {
                tracing::debug!(
                    projection = projection.name(),
                    unconfirmed,
                    "Live events not found in the committed log"
                );
            }
        }

        tracing::info!(events_read = index, "Projection catch-up complete");
        Ok(index)
    }

    /// Resets every projection and replays the committed log from the start.
    #[tracing::instrument(skip_all)]
    pub async fn rebuild(
        &self,
        reader: &dyn EventReader<AggregateId, EventEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.catch_up(reader, cancel).await
    }
}

impl std::fmt::Debug for ProjectionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.projections.iter().map(|p| p.name()).collect();
        f.debug_struct("ProjectionDispatcher")
            .field("projections", &names)
            .finish()
    }
}

#[async_trait]
impl EventDispatcher<EventEnvelope> for ProjectionDispatcher {
    async fn dispatch(
        &self,
        events: &[EventEnvelope],
        cancel: &CancellationToken,
    ) -> std::result::Result<(), DispatchError> {
        self.apply(events, cancel).await.map_err(|error| match error {
            ProjectionError::Cancelled => DispatchError::Cancelled,
            other => DispatchError::Consumer(Box::new(other)),
        })
    }
}

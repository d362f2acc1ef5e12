//! Per-stream activity summary, independent of any aggregate's payload shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// What the view knows about one aggregate stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_count: u64,
    pub last_event_type: String,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    /// Correlation id of the most recent event, when the pipeline stamped one.
    pub last_correlation_id: Option<String>,
}

struct SummaryState {
    streams: HashMap<AggregateId, StreamSummary>,
    event_types: HashMap<String, u64>,
    position: ProjectionPosition,
}

impl SummaryState {
    fn empty() -> Self {
        Self {
            streams: HashMap::new(),
            event_types: HashMap::new(),
            position: ProjectionPosition::zero(),
        }
    }
}

/// Read model counting events per stream and per event type.
///
/// Clones share state, so one handle can be registered with a dispatcher
/// while another serves queries.
#[derive(Clone)]
pub struct StreamSummaryView {
    state: Arc<RwLock<SummaryState>>,
}

impl StreamSummaryView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SummaryState::empty())),
        }
    }

    pub async fn get(&self, aggregate_id: &AggregateId) -> Option<StreamSummary> {
        self.state.read().await.streams.get(aggregate_id).cloned()
    }

    /// Every known stream, most recently active first.
    pub async fn all(&self) -> Vec<StreamSummary> {
        let mut streams: Vec<_> = self.state.read().await.streams.values().cloned().collect();
        streams.sort_by(|a, b| b.last_event_at.cmp(&a.last_event_at));
        streams
    }

    pub async fn by_aggregate_type(&self, aggregate_type: &str) -> Vec<StreamSummary> {
        self.state
            .read()
            .await
            .streams
            .values()
            .filter(|s| s.aggregate_type == aggregate_type)
            .cloned()
            .collect()
    }

    pub async fn event_type_count(&self, event_type: &str) -> u64 {
        self.state
            .read()
            .await
            .event_types
            .get(event_type)
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_events(&self) -> u64 {
        self.state.read().await.event_types.values().sum()
    }
}

impl Default for StreamSummaryView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for StreamSummaryView {
    fn name(&self) -> &'static str {
        "StreamSummaryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let correlation_id = event
            .metadata
            .get("correlation_id")
            .and_then(|value| value.as_str())
            .map(str::to_string);

        let mut state = self.state.write().await;

        state
            .streams
            .entry(event.aggregate_id)
            .and_modify(|summary| {
                summary.event_count += 1;
                summary.last_event_type.clone_from(&event.event_type);
                summary.last_event_at = event.timestamp;
                summary.last_correlation_id.clone_from(&correlation_id);
            })
            .or_insert_with(|| StreamSummary {
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type.clone(),
                event_count: 1,
                last_event_type: event.event_type.clone(),
                first_event_at: event.timestamp,
                last_event_at: event.timestamp,
                last_correlation_id: correlation_id.clone(),
            });

        *state
            .event_types
            .entry(event.event_type.clone())
            .or_insert(0) += 1;

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position.clone()
    }

    async fn set_position(&self, position: ProjectionPosition) {
        self.state.write().await.position = position;
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = SummaryState::empty();
        Ok(())
    }
}

impl ReadModel for StreamSummaryView {
    fn name(&self) -> &'static str {
        "StreamSummaryView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.streams.len()).unwrap_or(0)
    }
}

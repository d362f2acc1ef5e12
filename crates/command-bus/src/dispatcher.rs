//! Event dispatcher contract and an in-process broadcast implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// Delivers the events of one command invocation to downstream consumers.
///
/// Called at most once per invocation, inside the store transaction and
/// before commit, with every persisted event in staging order. A failure
/// rolls the transaction back.
#[async_trait]
pub trait EventDispatcher<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    async fn dispatch(&self, events: &[E], cancel: &CancellationToken)
    -> Result<(), DispatchError>;
}

/// Publishes each batch to in-process subscribers over a tokio broadcast
/// channel.
///
/// Batches are shared as `Arc<[E]>`. Publishing with no subscribers is not an
/// error; lagging subscribers miss the oldest batches.
pub struct BroadcastDispatcher<E> {
    sender: broadcast::Sender<Arc<[E]>>,
}

impl<E> BroadcastDispatcher<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Creates a dispatcher that buffers up to `capacity` batches per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[E]>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> Clone for BroadcastDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[async_trait]
impl<E> EventDispatcher<E> for BroadcastDispatcher<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn dispatch(
        &self,
        events: &[E],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let batch: Arc<[E]> = Arc::from(events.to_vec());
        match self.sender.send(batch) {
            Ok(subscribers) => {
                tracing::debug!(events = events.len(), subscribers, "Broadcast event batch");
            }
            Err(_) => {
                tracing::trace!(events = events.len(), "No subscribers for event batch");
            }
        }
        Ok(())
    }
}

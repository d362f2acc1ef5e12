//! Assembly of a [`CommandProcessor`] from its collaborators.

use std::sync::Arc;

use event_store::{AggregateKey, EventStore};

use crate::dispatcher::EventDispatcher;
use crate::error::BuildError;
use crate::handler::HandlerResolver;
use crate::notifications::{CommandNotifications, NoopNotifications};
use crate::processor::CommandProcessor;

/// Builder for [`CommandProcessor`].
///
/// Handlers, store and dispatcher are required. Notifications default to
/// [`NoopNotifications`].
pub struct CommandProcessorBuilder<I, E> {
    handlers: Option<Arc<dyn HandlerResolver<I, E>>>,
    store: Option<Arc<dyn EventStore<I, E>>>,
    dispatcher: Option<Arc<dyn EventDispatcher<E>>>,
    notifications: Option<Arc<dyn CommandNotifications<I, E>>>,
}

impl<I, E> CommandProcessorBuilder<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: None,
            store: None,
            dispatcher: None,
            notifications: None,
        }
    }

    pub fn handlers(mut self, handlers: impl HandlerResolver<I, E> + 'static) -> Self {
        self.handlers = Some(Arc::new(handlers));
        self
    }

    pub fn store(mut self, store: impl EventStore<I, E> + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Uses a store that is shared with other components.
    pub fn shared_store(mut self, store: Arc<dyn EventStore<I, E>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: impl EventDispatcher<E> + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Uses a dispatcher that is shared with other components.
    pub fn shared_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher<E>>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn notifications(
        mut self,
        notifications: impl CommandNotifications<I, E> + 'static,
    ) -> Self {
        self.notifications = Some(Arc::new(notifications));
        self
    }

    /// Builds the processor.
    pub fn build(self) -> Result<CommandProcessor<I, E>, BuildError> {
        let handlers = self
            .handlers
            .ok_or(BuildError::MissingComponent("handler resolver"))?;
        let store = self
            .store
            .ok_or(BuildError::MissingComponent("event store"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(BuildError::MissingComponent("event dispatcher"))?;
        let notifications: Arc<dyn CommandNotifications<I, E>> = match self.notifications {
            Some(notifications) => notifications,
            None => Arc::new(NoopNotifications),
        };

        Ok(CommandProcessor::from_parts(
            handlers,
            store,
            dispatcher,
            notifications,
        ))
    }
}

impl<I, E> Default for CommandProcessorBuilder<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

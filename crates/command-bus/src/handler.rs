//! Command handlers and the type-keyed registry that resolves them.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::AggregateKey;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::context::CommandContext;
use crate::error::{BoxError, ProcessError};

/// Handles one command type.
///
/// Handlers load or create aggregates through a repository, attach them to
/// the context's unit of work and mutate them. They never persist anything
/// themselves.
#[async_trait]
pub trait CommandHandler<C, I, E>: Send + Sync
where
    C: Command,
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    async fn handle(
        &self,
        command: &C,
        context: &mut CommandContext<I, E>,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;
}

/// A handler with its command type erased, as stored in a registry.
#[async_trait]
pub trait ErasedHandler<I, E>: Send + Sync
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Type name of the wrapped handler.
    fn handler_name(&self) -> &'static str;

    async fn handle_erased(
        &self,
        command: &dyn Command,
        context: &mut CommandContext<I, E>,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError>;
}

struct TypedHandler<C, H> {
    handler: H,
    _command: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C, H, I, E> ErasedHandler<I, E> for TypedHandler<C, H>
where
    C: Command,
    H: CommandHandler<C, I, E>,
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn handle_erased(
        &self,
        command: &dyn Command,
        context: &mut CommandContext<I, E>,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let command = command.as_any().downcast_ref::<C>().ok_or_else(|| {
            ProcessError::UnhandledCommand {
                command: command.command_name(),
            }
        })?;

        self.handler
            .handle(command, context, cancel)
            .await
            .map_err(ProcessError::Handler)
    }
}

/// Resolves the handlers registered for a command's runtime type.
pub trait HandlerResolver<I, E>: Send + Sync
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Returns the handlers for `command_type`, in registration order.
    fn resolve(&self, command_type: TypeId) -> Vec<Arc<dyn ErasedHandler<I, E>>>;
}

/// Static table of handlers keyed by command type.
///
/// Several handlers may be registered for the same command; they run in the
/// order they were registered.
pub struct HandlerRegistry<I, E> {
    handlers: HashMap<TypeId, Vec<Arc<dyn ErasedHandler<I, E>>>>,
}

impl<I, E> HandlerRegistry<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for commands of type `C`.
    pub fn register<C, H>(&mut self, handler: H) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C, I, E> + 'static,
    {
        let entry: Arc<dyn ErasedHandler<I, E>> = Arc::new(TypedHandler {
            handler,
            _command: PhantomData::<fn() -> C>,
        });
        tracing::debug!(
            command = std::any::type_name::<C>(),
            handler = entry.handler_name(),
            "Registered command handler"
        );
        self.handlers
            .entry(TypeId::of::<C>())
            .or_default()
            .push(entry);
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C, I, E> + 'static,
    {
        self.register::<C, H>(handler);
        self
    }

    /// Number of handlers registered for `C`.
    pub fn handler_count<C: Command>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<C>())
            .map_or(0, |handlers| handlers.len())
    }

    pub fn is_registered<C: Command>(&self) -> bool {
        self.handler_count::<C>() > 0
    }
}

impl<I, E> Default for HandlerRegistry<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, E> HandlerResolver<I, E> for HandlerRegistry<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    fn resolve(&self, command_type: TypeId) -> Vec<Arc<dyn ErasedHandler<I, E>>> {
        self.handlers
            .get(&command_type)
            .cloned()
            .unwrap_or_default()
    }
}

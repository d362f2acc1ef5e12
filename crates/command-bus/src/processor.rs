//! The command dispatch engine.

use std::sync::Arc;
use std::time::Instant;

use event_store::{AggregateKey, EventStore, EventStoreTransaction, TransactionScope};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::builder::CommandProcessorBuilder;
use crate::command::Command;
use crate::context::CommandContext;
use crate::dispatcher::EventDispatcher;
use crate::error::{ProcessError, Result};
use crate::handler::HandlerResolver;
use crate::notifications::CommandNotifications;
use crate::unit_of_work::PendingChanges;

/// Summary of a successful invocation.
///
/// The committed events themselves reach consumers through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub invocation_id: Uuid,
    pub aggregates_persisted: usize,
    pub events_committed: usize,
}

impl ProcessOutcome {
    fn unchanged(invocation_id: Uuid) -> Self {
        Self {
            invocation_id,
            aggregates_persisted: 0,
            events_committed: 0,
        }
    }

    /// Returns true if the invocation committed any events.
    pub fn has_changes(&self) -> bool {
        self.events_committed > 0
    }
}

/// Runs commands through their handlers and commits the resulting events
/// atomically.
///
/// For every call the processor creates a fresh [`CommandContext`], runs the
/// handlers registered for the command's runtime type, and, if any tracked
/// aggregate recorded events, stages them in one store transaction,
/// dispatches them as one batch and commits. Any failure after the
/// transaction is opened rolls it back and returns the original error.
///
/// The processor holds no per-call state: clones share the same collaborators
/// and can process commands concurrently. The event store is the only point
/// where concurrent invocations meet.
pub struct CommandProcessor<I, E> {
    handlers: Arc<dyn HandlerResolver<I, E>>,
    store: Arc<dyn EventStore<I, E>>,
    dispatcher: Arc<dyn EventDispatcher<E>>,
    notifications: Arc<dyn CommandNotifications<I, E>>,
}

impl<I, E> Clone for CommandProcessor<I, E> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            notifications: Arc::clone(&self.notifications),
        }
    }
}

impl<I, E> CommandProcessor<I, E>
where
    I: AggregateKey,
    E: Clone + Send + Sync + 'static,
{
    /// Starts assembling a processor.
    pub fn builder() -> CommandProcessorBuilder<I, E> {
        CommandProcessorBuilder::new()
    }

    pub(crate) fn from_parts(
        handlers: Arc<dyn HandlerResolver<I, E>>,
        store: Arc<dyn EventStore<I, E>>,
        dispatcher: Arc<dyn EventDispatcher<E>>,
        notifications: Arc<dyn CommandNotifications<I, E>>,
    ) -> Self {
        Self {
            handlers,
            store,
            dispatcher,
            notifications,
        }
    }

    /// Processes one command.
    pub async fn process<C: Command>(
        &self,
        command: C,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        self.process_dyn(&command, cancel).await
    }

    /// Processes a command whose type is only known at runtime.
    #[tracing::instrument(
        skip(self, command, cancel),
        fields(command = command.command_name(), invocation_id = tracing::field::Empty)
    )]
    pub async fn process_dyn(
        &self,
        command: &dyn Command,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let command_name = command.command_name();
        if let Err(reason) = command.validate() {
            tracing::debug!(%reason, "Rejected invalid command");
            return Err(ProcessError::InvalidArgument {
                command: command_name,
                reason,
            });
        }

        let started = Instant::now();
        let result = self.run(command, cancel).await;

        let status = match &result {
            Ok(_) => "committed",
            Err(ProcessError::ConcurrencyConflict { .. }) => "conflict",
            Err(ProcessError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        metrics::counter!(
            "commands_processed_total",
            "command" => command_name,
            "status" => status
        )
        .increment(1);
        metrics::histogram!("command_duration_seconds", "command" => command_name)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => tracing::debug!(
                aggregates = outcome.aggregates_persisted,
                events = outcome.events_committed,
                "Command processed"
            ),
            Err(err) => tracing::debug!(error = %err, "Command failed"),
        }

        result
    }

    async fn run(&self, command: &dyn Command, cancel: &CancellationToken) -> Result<ProcessOutcome> {
        let command_name = command.command_name();
        let mut context = CommandContext::new(command_name);
        let invocation_id = context.invocation_id();
        tracing::Span::current().record("invocation_id", tracing::field::display(invocation_id));

        self.notifications.on_prepare_context(command, &mut context);

        let handlers = self.handlers.resolve(command.as_any().type_id());
        if handlers.is_empty() {
            return Err(ProcessError::UnhandledCommand {
                command: command_name,
            });
        }

        for handler in &handlers {
            tracing::trace!(handler = handler.handler_name(), "Running command handler");
            handler.handle_erased(command, &mut context, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        if !context.unit_of_work().has_changes() {
            tracing::debug!("Command produced no changes");
            return Ok(ProcessOutcome::unchanged(invocation_id));
        }

        let changes = context.unit_of_work().staged_changes();
        let scope = TransactionScope::new(invocation_id, command_name);
        let mut transaction = self.store.begin_transaction(&scope).await?;

        match self
            .persist(transaction.as_mut(), command, &context, changes, cancel)
            .await
        {
            Ok(outcome) => {
                // Pending events are consumed only once they are durable.
                context.unit_of_work_mut().take_changes();
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Rolling back command transaction");
                metrics::counter!("command_rollbacks_total", "command" => command_name)
                    .increment(1);

                match transaction.rollback().await {
                    Ok(()) => Err(err),
                    Err(rollback) => {
                        tracing::error!(error = %rollback, "Rollback failed");
                        Err(ProcessError::RollbackFailed {
                            original: Box::new(err),
                            rollback,
                        })
                    }
                }
            }
        }
    }

    /// Stages, dispatches and commits. The caller rolls back on error.
    async fn persist(
        &self,
        transaction: &mut dyn EventStoreTransaction<I, E>,
        command: &dyn Command,
        context: &CommandContext<I, E>,
        changes: Vec<PendingChanges<I, E>>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let aggregates_persisted = changes.len();
        let mut batch: Vec<E> = Vec::new();

        for change in changes {
            let start = batch.len();
            batch.extend(
                change
                    .events
                    .into_iter()
                    .map(|event| self.notifications.on_enrich_event(event, command, context)),
            );

            let version = transaction
                .store_events(
                    &change.aggregate_id,
                    change.expected_version,
                    &batch[start..],
                    cancel,
                )
                .await?;
            tracing::debug!(
                aggregate_id = %change.aggregate_id,
                aggregate_type = change.aggregate_type,
                events = batch.len() - start,
                %version,
                "Staged aggregate events"
            );
        }

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        self.dispatcher.dispatch(&batch, cancel).await?;

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        transaction.commit().await?;

        metrics::counter!("command_events_committed_total").increment(batch.len() as u64);

        Ok(ProcessOutcome {
            invocation_id: context.invocation_id(),
            aggregates_persisted,
            events_committed: batch.len(),
        })
    }
}

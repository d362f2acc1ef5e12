//! Extension hooks invoked by the command pipeline.

use crate::command::Command;
use crate::context::CommandContext;

/// Hooks the pipeline calls around handler execution.
///
/// `on_prepare_context` runs once per invocation, before handlers are
/// resolved; it typically seeds ambient data such as correlation ids.
/// `on_enrich_event` runs once per event, right before the event is staged;
/// the returned value is what gets persisted and dispatched.
pub trait CommandNotifications<I, E>: Send + Sync {
    fn on_prepare_context(&self, command: &dyn Command, context: &mut CommandContext<I, E>);

    fn on_enrich_event(&self, event: E, command: &dyn Command, context: &CommandContext<I, E>)
    -> E;
}

/// Hooks that leave contexts and events untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifications;

impl<I, E> CommandNotifications<I, E> for NoopNotifications {
    fn on_prepare_context(&self, _command: &dyn Command, _context: &mut CommandContext<I, E>) {}

    fn on_enrich_event(
        &self,
        event: E,
        _command: &dyn Command,
        _context: &CommandContext<I, E>,
    ) -> E {
        event
    }
}

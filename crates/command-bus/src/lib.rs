//! Transactional command pipeline for event-sourced aggregates.
//!
//! A [`CommandProcessor`] routes each command to the handlers registered for
//! its runtime type. Handlers mutate aggregates tracked by the invocation's
//! [`UnitOfWork`]; the processor then stages every recorded event in a single
//! store transaction, hands the whole batch to the [`EventDispatcher`] and
//! commits. This crate provides:
//! - the [`AggregateRoot`] and [`Command`] contracts
//! - [`UnitOfWork`] and [`CommandContext`] for per-invocation state
//! - [`CommandNotifications`] hooks for context preparation and event enrichment
//! - [`HandlerRegistry`] for type-keyed handler resolution
//! - [`CommandProcessor`] and its builder

pub mod aggregate;
pub mod builder;
pub mod command;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod notifications;
pub mod processor;
pub mod telemetry;
pub mod unit_of_work;

pub use aggregate::{AggregateRoot, PendingEvents, TrackedAggregate};
pub use builder::CommandProcessorBuilder;
pub use command::{AsAny, Command};
pub use context::{CommandContext, ContextItems};
pub use dispatcher::{BroadcastDispatcher, EventDispatcher};
pub use error::{BoxError, BuildError, DispatchError, ProcessError, Result, UnitOfWorkError};
pub use handler::{CommandHandler, ErasedHandler, HandlerRegistry, HandlerResolver};
pub use notifications::{CommandNotifications, NoopNotifications};
pub use processor::{CommandProcessor, ProcessOutcome};
pub use telemetry::{LogFormat, TelemetryConfig, init_tracing};
pub use unit_of_work::{PendingChanges, UnitOfWork};

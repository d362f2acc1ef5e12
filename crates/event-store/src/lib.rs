//! Event store boundary for the command pipeline.
//!
//! The pipeline writes through a [`EventStoreTransaction`] opened per command
//! invocation; readers load streams through [`EventReader`]. Two
//! implementations ship with the crate:
//! - [`InMemoryEventStore`] for tests, benches and embedded use
//! - [`PostgresEventStore`] for [`EventEnvelope`] streams

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{AggregateId, AggregateKey};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{
    EventReader, EventStore, EventStoreTransaction, EventStream, TransactionScope,
    TransactionStatus,
};

//! Read-model projections for the command pipeline.
//!
//! This crate provides the read side of the pipeline:
//! - [`Projection`] trait for folding events into read models
//! - [`ReadModel`] trait for query access to projected data
//! - [`ProjectionDispatcher`], an [`command_bus::EventDispatcher`] that applies
//!   each batch before commit and replays the committed log on catch-up
//! - [`StreamSummaryView`], a per-stream activity view

pub mod dispatcher;
pub mod error;
pub mod projection;
pub mod read_model;
pub mod views;

pub use dispatcher::ProjectionDispatcher;
pub use error::{ProjectionError, Result};
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{StreamSummary, StreamSummaryView};

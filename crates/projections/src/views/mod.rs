//! Read model views built from committed events.

pub mod stream_summary;

pub use stream_summary::{StreamSummary, StreamSummaryView};

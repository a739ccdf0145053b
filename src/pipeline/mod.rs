//! Recognition Pipeline
//!
//! Frame dispatch (backpressure and scheduling of recognition jobs) and
//! result aggregation (freshness-ordered merge of completed jobs).

pub mod aggregator;
pub mod dispatcher;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{AggregatorSnapshot, PublishedText, ResultAggregator};
pub use dispatcher::{DispatchStats, DispatcherConfig, FrameDispatcher, Submission};

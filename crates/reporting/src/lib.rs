//! Multi-touch attribution — per-booking credit under five weighting models,
//! channel roll-ups, model comparison and bulk recompute.

pub mod aggregate;
pub mod attribution;
pub mod bulk;
pub mod store;

pub use aggregate::{aggregate_by_channel, channel_roas, compare_models, ChannelCredit};
pub use attribution::{
    attribute, attribute_with_reference, AttributionModel, AttributionSettings, ModelKind,
    PositionWeights,
};
pub use bulk::{recompute_bulk, AttributionResult, BulkOutcome, BulkRecomputer};
pub use store::{
    noop_sink, InMemoryResultSink, InMemoryTouchpointStore, ResultSink, TouchpointStore,
};

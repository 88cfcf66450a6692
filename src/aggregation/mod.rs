//! Statistics aggregation for pixel columns and cached bins
//!
//! Every pixel column owns a [`StatsAggregator`] over the queried measures;
//! every aggregate bin stored in the cache is a [`MeasureStats`]. Folding a
//! cached bin into a column is a count-weighted merge of the two.

pub mod stats;

pub use stats::{MeasureStats, StatsAggregator};

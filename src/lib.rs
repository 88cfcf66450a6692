//! Kuba VizCache - error-bounded caching for time-series line charts
//!
//! This library answers visualization queries over remote time series:
//! - Caches raw and pre-aggregated spans in an interval index
//! - Folds cached data into per-pixel-column statistics
//! - Bounds the pixel error of every column before touching the source
//! - Fetches only what the requested accuracy demands, then prefetches

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod range_set;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Count/sum/min/max/first/last aggregation per measure
pub mod aggregation;

/// Span cache over an interval index
pub mod cache;

/// Boundary to the backing time-series store
pub mod source;

/// Query evaluation, error bounding and fetching
pub mod query;

// Re-export main types
pub use cache::CacheManager;
pub use config::Config;
pub use error::{Error, Result};
pub use query::{Query, QueryBuilder, QueryExecutor, QueryResults};
pub use source::{DataSource, InMemoryDataSource};
pub use types::{AggregationMethod, MeasureId, TimeInterval, TimedValue, ValueRange};

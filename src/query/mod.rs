//! Query engine for pixel-perfect line charts
//!
//! A visualization query asks for `W` pixel columns by `H` pixel rows over
//! `[from, to)`. The engine answers it from cached spans where it can,
//! bounds the rendering error of whatever is missing, and fetches only the
//! columns whose error exceeds the requested accuracy.
//!
//! # Architecture
//!
//! ```text
//! QueryBuilder
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Lookup    │  Eligible spans from the interval index
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Fold     │  Spans → PixelColumns (stats, coverage, partials)
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Evaluate   │  Certain vs possible pixel rows per column
//! └─────────────┘
//!      │   error > 1 - accuracy
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  Raw or aggregated, folded while read, then cached
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Respond    │  first/min/max/last per column, then prefetch
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_vizcache::query::{QueryBuilder, QueryExecutor};
//! use kuba_vizcache::cache::CacheManager;
//! use kuba_vizcache::source::InMemoryDataSource;
//! use kuba_vizcache::types::TimedValue;
//! use std::sync::Arc;
//!
//! let points = (0..1000).map(|i| TimedValue::new(i, (i % 17) as f64)).collect();
//! let source = Arc::new(InMemoryDataSource::new(1).with_measure(0, points));
//! let executor = QueryExecutor::new(source, Arc::new(CacheManager::new()));
//!
//! let query = QueryBuilder::new()
//!     .range(0, 1000)
//!     .measure(0)
//!     .viewport(100, 50)
//!     .build()?;
//! let results = executor.execute(&query)?;
//! assert!(!results.has_error());
//! # Ok::<(), kuba_vizcache::Error>(())
//! ```

pub mod ast;
pub mod error_calculator;
pub mod executor;
pub mod max_error;
pub mod pixel_column;
pub mod prefetch;
pub mod processor;
pub mod result;

pub use ast::{Query, QueryBuilder};
pub use error_calculator::{ErrorCalculator, ErrorMode, ErrorReport, MeasureError};
pub use executor::{ExecutionStatsSnapshot, ExecutorConfig, QueryExecutor};
pub use max_error::{MaxErrorEvaluator, MaxErrorReport, RowRange, RowScale};
pub use pixel_column::{PartialCandidate, PixelColumn, PixelColumns};
pub use prefetch::{PrefetchConfig, PrefetchManager, PrefetchOutcome, PrefetchStats};
pub use processor::{DataProcessor, FetchKind, FetchOutcome, MissingRanges, ProcessorConfig};
pub use result::{MeasureResult, QueryResults, QueryTimings, Resolution, SummaryStats};

//! Query result types
//!
//! Everything here derives `Serialize` so an outer surface can emit the
//! answer as JSON without further mapping.

use crate::error::Result;
use crate::query::processor::FetchKind;
use crate::types::{MeasureId, TimeInterval, TimedValue};
use serde::Serialize;
use std::time::Duration;

// ============================================================================
// Per-Measure Results
// ============================================================================

/// Summary statistics of one measure over all rendered columns
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SummaryStats {
    /// Number of samples
    pub count: u64,
    /// Smallest value, `None` without samples
    pub min: Option<f64>,
    /// Largest value, `None` without samples
    pub max: Option<f64>,
    /// Sum of all samples
    pub sum: f64,
}

impl SummaryStats {
    /// Arithmetic mean, `None` without samples
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// How the reported error of a measure was established
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Error bounded from cached and fetched data
    Bounded,

    /// An exact per-column fetch replaced the measure's data
    Exact {
        /// Columns for which the exact fetch returned no data
        empty_columns: Vec<usize>,
    },
}

impl Resolution {
    /// True when an exact fetch was needed
    pub fn is_exact(&self) -> bool {
        matches!(self, Resolution::Exact { .. })
    }
}

/// Rendering of one measure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureResult {
    /// Measure
    pub measure: MeasureId,

    /// First/min/max/last of every non-empty column, in time order
    pub points: Vec<TimedValue>,

    /// Statistics over all columns
    pub summary: SummaryStats,

    /// Normalized maximum rendering error in `[0, 1]`
    pub error: f64,

    /// Whether `error` exceeds `1 - accuracy`
    pub has_error: bool,

    /// How the error was established
    pub resolution: Resolution,
}

// ============================================================================
// Query Results
// ============================================================================

/// Execution timings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QueryTimings {
    /// Wall-clock time of the whole execution
    pub total: Duration,
    /// Time spent in fetch rounds
    pub fetch: Duration,
    /// Time spent in the exact fallback, if it ran
    pub fallback: Option<Duration>,
}

/// Answer to one visualization query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResults {
    /// Queried range
    pub interval: TimeInterval,

    /// Viewport width in pixel columns
    pub width: u32,

    /// Viewport height in pixel rows
    pub height: u32,

    /// Per-measure renderings, ascending by measure
    pub measures: Vec<MeasureResult>,

    /// Timings
    pub timings: QueryTimings,

    /// Rows read from the source (excluding prefetch)
    pub io_points: u64,

    /// Aggregation factor used for this query's fetches
    pub aggregation_factor: f64,

    /// Cached spans folded in
    pub cached_spans: usize,

    /// Kind of the missing-data fetch, if one ran
    pub fetch_kind: Option<FetchKind>,
}

impl QueryResults {
    /// Result of `measure`
    pub fn measure(&self, measure: MeasureId) -> Option<&MeasureResult> {
        self.measures.iter().find(|m| m.measure == measure)
    }

    /// Whether any measure exceeds its tolerance
    pub fn has_error(&self) -> bool {
        self.measures.iter().any(|m| m.has_error)
    }

    /// Total number of render points
    pub fn point_count(&self) -> usize {
        self.measures.iter().map(|m| m.points.len()).sum()
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//! Data source boundary
//!
//! The cache never talks to a storage backend directly. Everything it needs
//! is expressed through the [`DataSource`] trait: raw samples for a set of
//! per-measure time ranges, or fixed-width aggregated bins for a set of
//! [`BinGroup`]s.
//!
//! # Contract
//!
//! - Both fetches may return zero rows for any requested range; that means
//!   "no data", never an error.
//! - A backend failure is reported as [`SourceError::Unavailable`] and fails
//!   the whole query.
//! - Aggregated rows are returned only for non-empty bins. A requested bin
//!   with no row is confirmed empty.

pub mod memory;

pub use memory::InMemoryDataSource;

use crate::aggregation::MeasureStats;
use crate::error::SourceError;
use crate::types::{AggregationMethod, MeasureId, TimeInterval, TimedValue};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Raw Fetch
// ============================================================================

/// Raw sample request, ranges grouped by measure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRequest {
    /// Ranges to read for each measure
    pub ranges: BTreeMap<MeasureId, Vec<TimeInterval>>,
}

impl RawRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one range for `measure`; empty ranges are ignored
    pub fn add(&mut self, measure: MeasureId, interval: TimeInterval) {
        if !interval.is_empty() {
            self.ranges.entry(measure).or_default().push(interval);
        }
    }

    /// True when nothing would be read
    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(Vec::is_empty)
    }

    /// Total requested duration in milliseconds
    pub fn total_duration(&self) -> i64 {
        self.ranges
            .values()
            .flatten()
            .map(TimeInterval::duration)
            .sum()
    }
}

/// One raw sample returned by a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRow {
    /// Sample timestamp in milliseconds
    pub timestamp: i64,
    /// Measure the sample belongs to
    pub measure: MeasureId,
    /// Sample value
    pub value: f64,
}

impl RawRow {
    /// The row as a timed value
    pub fn timed_value(&self) -> TimedValue {
        TimedValue::new(self.timestamp, self.value)
    }
}

// ============================================================================
// Aggregate Fetch
// ============================================================================

/// A run of fixed-width bins over one measure
///
/// Bin `k` covers `[interval.from + k * bin_width, interval.from + (k+1) * bin_width)`,
/// the last bin clipped to `interval.to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinGroup {
    /// Measure to aggregate
    pub measure: MeasureId,
    /// Interval tiled by the bins
    pub interval: TimeInterval,
    /// Bin width in milliseconds (at least 1)
    pub bin_width: i64,
}

impl BinGroup {
    /// Number of bins in the group
    pub fn bin_count(&self) -> usize {
        if self.interval.is_empty() || self.bin_width <= 0 {
            return 0;
        }
        ((self.interval.duration() + self.bin_width - 1) / self.bin_width) as usize
    }
}

/// Aggregated bin request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateRequest {
    /// Reduction the backend should apply per bin
    pub method: AggregationMethod,
    /// Bin runs to compute
    pub groups: Vec<BinGroup>,
}

impl AggregateRequest {
    /// Create an empty request for `method`
    pub fn new(method: AggregationMethod) -> Self {
        Self {
            method,
            groups: Vec::new(),
        }
    }

    /// True when nothing would be read
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of bins requested
    pub fn bin_count(&self) -> usize {
        self.groups.iter().map(BinGroup::bin_count).sum()
    }
}

/// One non-empty aggregated bin returned by a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedRow {
    /// Measure the bin belongs to
    pub measure: MeasureId,
    /// Interval of the bin
    pub interval: TimeInterval,
    /// Number of samples in the bin (at least 1)
    pub count: u64,
    /// Sum of the samples
    pub sum: f64,
    /// Sample with the smallest value
    pub min: TimedValue,
    /// Sample with the largest value
    pub max: TimedValue,
    /// Earliest sample, absent for min/max-only reductions
    pub first: Option<TimedValue>,
    /// Latest sample, absent for min/max-only reductions
    pub last: Option<TimedValue>,
}

impl AggregatedRow {
    /// Convert into bin statistics
    ///
    /// Without first/last, the earlier of the min/max pair stands in for the
    /// first sample and the later one for the last.
    pub fn to_stats(&self) -> MeasureStats {
        let (early, late) = if self.max.timestamp < self.min.timestamp {
            (self.max, self.min)
        } else {
            (self.min, self.max)
        };
        MeasureStats::from_parts(
            self.count.max(1),
            self.sum,
            self.min,
            self.max,
            self.first.unwrap_or(early),
            self.last.unwrap_or(late),
        )
    }
}

// ============================================================================
// Data Source Trait
// ============================================================================

/// Backend the cache reads missing data from
///
/// Implementations must be thread-safe; fetches are synchronous and block
/// the calling query.
pub trait DataSource: Send + Sync {
    /// Overall time range of the stored data
    fn time_range(&self) -> TimeInterval;

    /// Nominal milliseconds between consecutive samples of one measure
    fn sampling_interval(&self) -> i64;

    /// Read raw samples, ordered by timestamp within each measure
    fn fetch_raw(&self, request: &RawRequest) -> Result<Vec<RawRow>, SourceError>;

    /// Read aggregated bins, one row per non-empty bin
    fn fetch_aggregated(
        &self,
        request: &AggregateRequest,
    ) -> Result<Vec<AggregatedRow>, SourceError>;
}

impl<S: DataSource + ?Sized> DataSource for Arc<S> {
    fn time_range(&self) -> TimeInterval {
        (**self).time_range()
    }

    fn sampling_interval(&self) -> i64 {
        (**self).sampling_interval()
    }

    fn fetch_raw(&self, request: &RawRequest) -> Result<Vec<RawRow>, SourceError> {
        (**self).fetch_raw(request)
    }

    fn fetch_aggregated(
        &self,
        request: &AggregateRequest,
    ) -> Result<Vec<AggregatedRow>, SourceError> {
        (**self).fetch_aggregated(request)
    }
}

//! Cached spans of raw points or fixed-width aggregate bins
//!
//! A span covers one measure over one [`TimeInterval`] and is immutable once
//! built. Two layouts exist:
//!
//! - **Raw**: the exact `(timestamp, value)` samples of the interval, sorted
//!   by time. A raw span certifies its *whole* interval: there are no samples
//!   in it other than the stored ones.
//! - **Aggregate**: a grid of `size = ceil((to - from) / g)` bins of width
//!   `g`, each holding count/sum/min/max/first/last. A bin without data is
//!   stored as `None` and certifies that its interval holds no samples.
//!
//! ```text
//!  from                                                   to
//!   |-- bin 0 --|-- bin 1 --|-- bin 2 --| ... |- bin n-1 -|
//!   |<-- g ---->|                              (clipped to `to`)
//! ```

use crate::aggregation::MeasureStats;
use crate::types::{MeasureId, TimeInterval, TimedValue};
use std::mem::size_of;

// ============================================================================
// Span
// ============================================================================

/// Cached data for one measure over one interval
#[derive(Debug, Clone, PartialEq)]
pub enum Span {
    /// Exact samples
    Raw(RawSpan),

    /// Binned aggregates
    Aggregate(AggregateSpan),
}

impl Span {
    /// Measure this span belongs to
    pub fn measure(&self) -> MeasureId {
        match self {
            Span::Raw(raw) => raw.measure,
            Span::Aggregate(agg) => agg.measure,
        }
    }

    /// Interval covered by this span
    pub fn interval(&self) -> TimeInterval {
        match self {
            Span::Raw(raw) => raw.interval,
            Span::Aggregate(agg) => agg.interval,
        }
    }

    /// Bin width in milliseconds, `None` for raw spans
    pub fn bin_width(&self) -> Option<i64> {
        match self {
            Span::Raw(_) => None,
            Span::Aggregate(agg) => Some(agg.bin_width),
        }
    }

    /// True for raw spans
    pub fn is_raw(&self) -> bool {
        matches!(self, Span::Raw(_))
    }

    /// Whether this span is fine enough for columns `pixel_column_interval` wide
    ///
    /// A bin must be at most half a column wide, which guarantees that a single
    /// bin straddles at most one column boundary. Raw spans always qualify.
    pub fn is_eligible(&self, pixel_column_interval: f64) -> bool {
        match self.bin_width() {
            None => true,
            Some(g) => pixel_column_interval >= 2.0 * g as f64,
        }
    }

    /// Number of underlying samples represented
    pub fn sample_count(&self) -> u64 {
        match self {
            Span::Raw(raw) => raw.points.len() as u64,
            Span::Aggregate(agg) => agg
                .bins
                .iter()
                .flatten()
                .map(MeasureStats::count)
                .sum(),
        }
    }

    /// Number of stored records (points or bins)
    pub fn record_count(&self) -> usize {
        match self {
            Span::Raw(raw) => raw.points.len(),
            Span::Aggregate(agg) => agg.bins.len(),
        }
    }

    /// Approximate heap footprint in bytes
    pub fn estimated_size_bytes(&self) -> usize {
        size_of::<Span>()
            + match self {
                Span::Raw(raw) => raw.points.len() * size_of::<TimedValue>(),
                Span::Aggregate(agg) => agg.bins.len() * size_of::<Option<MeasureStats>>(),
            }
    }
}

impl From<RawSpan> for Span {
    fn from(raw: RawSpan) -> Self {
        Span::Raw(raw)
    }
}

impl From<AggregateSpan> for Span {
    fn from(agg: AggregateSpan) -> Self {
        Span::Aggregate(agg)
    }
}

// ============================================================================
// Raw Span
// ============================================================================

/// Exact samples of one measure over one interval
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpan {
    measure: MeasureId,
    interval: TimeInterval,
    points: Vec<TimedValue>,
}

impl RawSpan {
    /// Build a raw span, keeping only samples inside `interval`
    ///
    /// Samples are stably sorted by timestamp.
    pub fn new(measure: MeasureId, interval: TimeInterval, points: Vec<TimedValue>) -> Self {
        let mut points: Vec<TimedValue> = points
            .into_iter()
            .filter(|p| interval.contains(p.timestamp))
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Self {
            measure,
            interval,
            points,
        }
    }

    /// Measure of the samples
    pub fn measure(&self) -> MeasureId {
        self.measure
    }

    /// Interval certified by this span
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Samples in timestamp order
    pub fn points(&self) -> &[TimedValue] {
        &self.points
    }
}

// ============================================================================
// Aggregate Span
// ============================================================================

/// One grid cell of an aggregate span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateBin {
    /// Interval of the cell (the last cell is clipped to the span end)
    pub interval: TimeInterval,

    /// Aggregate of the cell, `None` when the cell holds no samples
    pub stats: Option<MeasureStats>,
}

/// Fixed-width binned aggregates of one measure over one interval
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpan {
    measure: MeasureId,
    interval: TimeInterval,
    bin_width: i64,
    bins: Vec<Option<MeasureStats>>,
}

impl AggregateSpan {
    /// Number of cells needed to tile `interval` with width `bin_width`
    pub fn size_for(interval: &TimeInterval, bin_width: i64) -> usize {
        if interval.is_empty() || bin_width <= 0 {
            return 0;
        }
        ((interval.duration() + bin_width - 1) / bin_width) as usize
    }

    /// Build a span from pre-aggregated bins keyed by their start timestamp
    ///
    /// Each bin is placed into the cell containing its start; bins starting
    /// outside the interval are dropped and bins landing in the same cell are
    /// merged.
    pub fn from_bins<I>(measure: MeasureId, interval: TimeInterval, bin_width: i64, bins: I) -> Self
    where
        I: IntoIterator<Item = (i64, MeasureStats)>,
    {
        let bin_width = bin_width.max(1);
        let mut span = Self {
            measure,
            interval,
            bin_width,
            bins: vec![None; Self::size_for(&interval, bin_width)],
        };

        for (start, stats) in bins {
            if stats.is_empty() {
                continue;
            }
            if let Some(idx) = span.index_of(start) {
                let slot = &mut span.bins[idx];
                if let Some(existing) = slot {
                    existing.merge(&stats);
                } else {
                    *slot = Some(stats);
                }
            }
        }
        span
    }

    /// Aggregate raw samples onto the grid
    pub fn from_points(
        measure: MeasureId,
        interval: TimeInterval,
        bin_width: i64,
        points: &[TimedValue],
    ) -> Self {
        Self::from_bins(
            measure,
            interval,
            bin_width,
            points
                .iter()
                .map(|p| (p.timestamp, MeasureStats::from_value(*p))),
        )
    }

    /// Measure of the aggregates
    pub fn measure(&self) -> MeasureId {
        self.measure
    }

    /// Interval tiled by the grid
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Cell width in milliseconds
    pub fn bin_width(&self) -> i64 {
        self.bin_width
    }

    /// Number of cells
    pub fn size(&self) -> usize {
        self.bins.len()
    }

    /// Cell index of `timestamp`, if inside the span
    pub fn index_of(&self, timestamp: i64) -> Option<usize> {
        if !self.interval.contains(timestamp) {
            return None;
        }
        Some(((timestamp - self.interval.from) / self.bin_width) as usize)
    }

    /// Interval of cell `idx`
    pub fn bin_interval(&self, idx: usize) -> TimeInterval {
        let from = self.interval.from + idx as i64 * self.bin_width;
        let to = (from + self.bin_width).min(self.interval.to);
        TimeInterval::new_unchecked(from, to)
    }

    /// Aggregate of cell `idx`, `None` for empty or out-of-range cells
    pub fn bin(&self, idx: usize) -> Option<&MeasureStats> {
        self.bins.get(idx).and_then(Option::as_ref)
    }

    /// Iterate over all cells in time order
    pub fn bins(&self) -> impl Iterator<Item = AggregateBin> + '_ {
        self.bins.iter().enumerate().map(|(idx, stats)| AggregateBin {
            interval: self.bin_interval(idx),
            stats: *stats,
        })
    }
}

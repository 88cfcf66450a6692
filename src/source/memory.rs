//! In-memory reference backend
//!
//! Holds the samples of every measure sorted by timestamp and answers both
//! fetch kinds with binary searches. Request counters make it usable as a
//! test double, and `set_failing` switches it into a mode where every fetch
//! fails with [`SourceError::Unavailable`].

use super::{AggregateRequest, AggregatedRow, DataSource, RawRequest, RawRow};
use crate::aggregation::MeasureStats;
use crate::error::SourceError;
use crate::types::{AggregationMethod, MeasureId, TimeInterval, TimedValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Request counters of an [`InMemoryDataSource`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Raw fetches served
    pub raw_requests: u64,
    /// Aggregated fetches served
    pub aggregate_requests: u64,
    /// Raw rows returned
    pub raw_rows: u64,
    /// Aggregated rows returned
    pub aggregate_rows: u64,
}

/// Thread-safe in-memory [`DataSource`]
#[derive(Debug)]
pub struct InMemoryDataSource {
    /// Samples per measure, sorted by timestamp
    series: HashMap<MeasureId, Vec<TimedValue>>,

    /// Nominal sampling interval in milliseconds
    sampling_interval: i64,

    /// Explicit time range, derived from the samples when unset
    time_range: Option<TimeInterval>,

    failing: AtomicBool,
    raw_requests: AtomicU64,
    aggregate_requests: AtomicU64,
    raw_rows: AtomicU64,
    aggregate_rows: AtomicU64,
}

impl InMemoryDataSource {
    /// Create an empty source with the given nominal sampling interval
    pub fn new(sampling_interval: i64) -> Self {
        Self {
            series: HashMap::new(),
            sampling_interval: sampling_interval.max(1),
            time_range: None,
            failing: AtomicBool::new(false),
            raw_requests: AtomicU64::new(0),
            aggregate_requests: AtomicU64::new(0),
            raw_rows: AtomicU64::new(0),
            aggregate_rows: AtomicU64::new(0),
        }
    }

    /// Add samples for `measure`
    pub fn add_measure(&mut self, measure: MeasureId, mut points: Vec<TimedValue>) {
        points.sort_by_key(|p| p.timestamp);
        self.series.insert(measure, points);
    }

    /// Builder form of [`add_measure`](Self::add_measure)
    pub fn with_measure(mut self, measure: MeasureId, points: Vec<TimedValue>) -> Self {
        self.add_measure(measure, points);
        self
    }

    /// Override the reported time range
    pub fn with_time_range(mut self, time_range: TimeInterval) -> Self {
        self.time_range = Some(time_range);
        self
    }

    /// Make every subsequent fetch fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Request counters
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            raw_requests: self.raw_requests.load(Ordering::Relaxed),
            aggregate_requests: self.aggregate_requests.load(Ordering::Relaxed),
            raw_rows: self.raw_rows.load(Ordering::Relaxed),
            aggregate_rows: self.aggregate_rows.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(
                "in-memory source switched to failing mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Samples of `measure` inside `interval`
    fn slice(&self, measure: MeasureId, interval: &TimeInterval) -> &[TimedValue] {
        let Some(points) = self.series.get(&measure) else {
            return &[];
        };
        let start = points.partition_point(|p| p.timestamp < interval.from);
        let end = points.partition_point(|p| p.timestamp < interval.to);
        &points[start..end]
    }
}

impl DataSource for InMemoryDataSource {
    fn time_range(&self) -> TimeInterval {
        if let Some(range) = self.time_range {
            return range;
        }
        let mut bounds: Option<(i64, i64)> = None;
        for points in self.series.values() {
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(first.timestamp), hi.max(last.timestamp)),
                    None => (first.timestamp, last.timestamp),
                });
            }
        }
        match bounds {
            Some((lo, hi)) => TimeInterval::new_unchecked(lo, hi + 1),
            None => TimeInterval::new_unchecked(0, 0),
        }
    }

    fn sampling_interval(&self) -> i64 {
        self.sampling_interval
    }

    fn fetch_raw(&self, request: &RawRequest) -> Result<Vec<RawRow>, SourceError> {
        self.check_available()?;

        let mut rows = Vec::new();
        for (&measure, ranges) in &request.ranges {
            let mut ranges = ranges.clone();
            ranges.sort();
            for range in &ranges {
                rows.extend(self.slice(measure, range).iter().map(|p| RawRow {
                    timestamp: p.timestamp,
                    measure,
                    value: p.value,
                }));
            }
        }

        self.raw_requests.fetch_add(1, Ordering::Relaxed);
        self.raw_rows.fetch_add(rows.len() as u64, Ordering::Relaxed);
        Ok(rows)
    }

    fn fetch_aggregated(
        &self,
        request: &AggregateRequest,
    ) -> Result<Vec<AggregatedRow>, SourceError> {
        self.check_available()?;

        let mut rows = Vec::new();
        for group in &request.groups {
            if group.bin_width <= 0 {
                return Err(SourceError::InvalidRequest(format!(
                    "bin width must be positive, got {}",
                    group.bin_width
                )));
            }

            let mut bin_from = group.interval.from;
            while bin_from < group.interval.to {
                let bin_to = (bin_from + group.bin_width).min(group.interval.to);
                let bin = TimeInterval::new_unchecked(bin_from, bin_to);

                let mut stats = MeasureStats::new();
                for point in self.slice(group.measure, &bin) {
                    stats.accept(*point);
                }

                if let (Some(min), Some(max), Some(sum)) = (stats.min(), stats.max(), stats.sum())
                {
                    let (first, last) = match request.method {
                        AggregationMethod::M4 => (stats.first(), stats.last()),
                        AggregationMethod::MinMax => (None, None),
                    };
                    rows.push(AggregatedRow {
                        measure: group.measure,
                        interval: bin,
                        count: stats.count(),
                        sum,
                        min,
                        max,
                        first,
                        last,
                    });
                }
                bin_from = bin_to;
            }
        }

        self.aggregate_requests.fetch_add(1, Ordering::Relaxed);
        self.aggregate_rows
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        Ok(rows)
    }
}

//! Missing-data resolution
//!
//! The processor turns a set of missing ranges into one backend fetch and
//! new cache spans, folding every returned row into the live pixel columns
//! while the rows are consumed.
//!
//! # Raw or aggregated
//!
//! ```text
//! raw_estimate = sum(len) / sampling_interval
//! agg_points   = 4 * aggregation_factor * sum(len) / pixel_column_interval
//!
//! raw_estimate <= agg_points * data_reduction_ratio   =>  fetch raw
//! otherwise                                           =>  fetch bins of
//!                                                         pixel_column_interval / aggregation_factor
//! ```
//!
//! Fetched ranges are column-aligned. Before folding, the measure's columns
//! in each range are reset so the fetched data replaces whatever the cache
//! contributed there.

use crate::aggregation::MeasureStats;
use crate::cache::span::{AggregateSpan, RawSpan, Span};
use crate::error::Result;
use crate::metrics;
use crate::query::pixel_column::PixelColumns;
use crate::source::{AggregateRequest, BinGroup, DataSource, RawRequest};
use crate::types::{AggregationMethod, MeasureId, TimeInterval, TimedValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Missing ranges per measure
pub type MissingRanges = BTreeMap<MeasureId, Vec<TimeInterval>>;

// ============================================================================
// Processor Configuration
// ============================================================================

/// Configuration of the raw/aggregate decision
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How many times more raw points than aggregated values are tolerated
    /// before switching to aggregated fetches (default: 6.0)
    pub data_reduction_ratio: f64,

    /// Aggregation factor never drops below this so fetched bins stay at
    /// most half a pixel column wide (default: 2.0)
    pub min_aggregation_factor: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            data_reduction_ratio: 6.0,
            min_aggregation_factor: 2.0,
        }
    }
}

impl ProcessorConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data reduction ratio
    pub fn with_data_reduction_ratio(mut self, ratio: f64) -> Self {
        self.data_reduction_ratio = ratio.max(0.0);
        self
    }
}

// ============================================================================
// Fetch Outcome
// ============================================================================

/// Kind of data fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// Raw samples
    Raw,
    /// Aggregated bins
    Aggregate,
}

impl FetchKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Raw => "raw",
            FetchKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one fetch round
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Kind fetched, `None` when nothing had to be fetched
    pub kind: Option<FetchKind>,

    /// Spans built from the fetched rows, ready for the cache
    pub spans: Vec<Arc<Span>>,

    /// Rows returned by the source
    pub io_points: u64,

    /// Ranges fetched (summed over measures)
    pub ranges: usize,
}

// ============================================================================
// Data Processor
// ============================================================================

/// Fetches missing data and folds it into pixel columns
pub struct DataProcessor<S: DataSource> {
    source: Arc<S>,
    config: ProcessorConfig,
}

impl<S: DataSource> Clone for DataProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        }
    }
}

impl<S: DataSource> DataProcessor<S> {
    /// Create a processor over `source`
    pub fn new(source: Arc<S>, config: ProcessorConfig) -> Self {
        Self { source, config }
    }

    /// The backing source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Decide between a raw and an aggregated fetch
    ///
    /// Raw is chosen when the estimated raw point count is at most the four
    /// M4 values per covered column, scaled by the data-reduction ratio. The
    /// aggregation factor only affects the bin width of aggregated fetches.
    pub fn choose_kind(&self, missing: &MissingRanges, pixel_column_interval: f64) -> FetchKind {
        let total: i64 = missing.values().flatten().map(TimeInterval::duration).sum();
        let sampling = self.source.sampling_interval().max(1) as f64;
        let raw_estimate = total as f64 / sampling;
        let min_bins = 4.0 * total as f64 / pixel_column_interval.max(1.0);

        if raw_estimate <= min_bins * self.config.data_reduction_ratio {
            FetchKind::Raw
        } else {
            FetchKind::Aggregate
        }
    }

    /// Bin width of aggregated fetches
    pub fn bin_width(&self, pixel_column_interval: f64, aggregation_factor: f64) -> i64 {
        let factor = aggregation_factor.max(self.config.min_aggregation_factor);
        ((pixel_column_interval / factor).floor() as i64).max(1)
    }

    /// Fetch `missing` and fold it into `columns`
    pub fn fetch_missing(
        &self,
        columns: &mut PixelColumns,
        missing: &MissingRanges,
        aggregation_factor: f64,
        method: AggregationMethod,
    ) -> Result<FetchOutcome> {
        let pci = columns.interval().duration() as f64 / columns.width() as f64;
        self.fetch(Some(columns), missing, pci, aggregation_factor, method)
    }

    /// Fetch `missing` into spans only; no column is touched
    pub fn fetch_spans(
        &self,
        missing: &MissingRanges,
        pixel_column_interval: f64,
        aggregation_factor: f64,
        method: AggregationMethod,
    ) -> Result<FetchOutcome> {
        self.fetch(None, missing, pixel_column_interval, aggregation_factor, method)
    }

    fn fetch(
        &self,
        mut columns: Option<&mut PixelColumns>,
        missing: &MissingRanges,
        pci: f64,
        aggregation_factor: f64,
        method: AggregationMethod,
    ) -> Result<FetchOutcome> {
        let missing: MissingRanges = missing
            .iter()
            .map(|(&m, ranges)| (m, ranges.iter().copied().filter(|r| !r.is_empty()).collect::<Vec<_>>()))
            .filter(|(_, ranges)| !ranges.is_empty())
            .collect();
        if missing.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let kind = self.choose_kind(&missing, pci);
        let range_count: usize = missing.values().map(Vec::len).sum();
        debug!(
            kind = %kind,
            ranges = range_count,
            pixel_column_interval = pci,
            aggregation_factor,
            "Fetching missing data"
        );

        if let Some(columns) = columns.as_deref_mut() {
            for (&measure, ranges) in &missing {
                for range in ranges {
                    columns.reset_range(measure, range)?;
                }
            }
        }

        let mut outcome = match kind {
            FetchKind::Raw => self.fetch_raw(columns, &missing)?,
            FetchKind::Aggregate => {
                let bin_width = self.bin_width(pci, aggregation_factor);
                self.fetch_aggregated(columns, &missing, bin_width, method)?
            }
        };
        outcome.kind = Some(kind);
        outcome.ranges = range_count;
        metrics::record_fetch(kind.as_str(), outcome.io_points);
        Ok(outcome)
    }

    fn fetch_raw(
        &self,
        mut columns: Option<&mut PixelColumns>,
        missing: &MissingRanges,
    ) -> Result<FetchOutcome> {
        let mut request = RawRequest::new();
        for (&measure, ranges) in missing {
            for range in ranges {
                request.add(measure, *range);
            }
        }

        let rows = self.source.fetch_raw(&request)?;
        let io_points = rows.len() as u64;

        let mut by_measure: BTreeMap<MeasureId, Vec<TimedValue>> = BTreeMap::new();
        for row in rows {
            if !missing.contains_key(&row.measure) {
                continue;
            }
            if let Some(columns) = columns.as_deref_mut() {
                columns.fold_point(row.measure, row.timed_value())?;
            }
            by_measure.entry(row.measure).or_default().push(row.timed_value());
        }

        let mut spans = Vec::new();
        for (&measure, ranges) in missing {
            let points = by_measure.remove(&measure).unwrap_or_default();
            for range in ranges {
                if let Some(columns) = columns.as_deref_mut() {
                    columns.certify(measure, range)?;
                }
                let inside: Vec<TimedValue> =
                    points.iter().copied().filter(|p| range.contains(p.timestamp)).collect();
                spans.push(Arc::new(Span::from(RawSpan::new(measure, *range, inside))));
            }
        }

        Ok(FetchOutcome {
            kind: None,
            spans,
            io_points,
            ranges: 0,
        })
    }

    fn fetch_aggregated(
        &self,
        mut columns: Option<&mut PixelColumns>,
        missing: &MissingRanges,
        bin_width: i64,
        method: AggregationMethod,
    ) -> Result<FetchOutcome> {
        let mut request = AggregateRequest::new(method);
        for (&measure, ranges) in missing {
            for range in ranges {
                request.groups.push(BinGroup {
                    measure,
                    interval: *range,
                    bin_width,
                });
            }
        }

        let rows = self.source.fetch_aggregated(&request)?;
        let io_points = rows.len() as u64;

        let mut by_measure: BTreeMap<MeasureId, Vec<(i64, MeasureStats)>> =
            BTreeMap::new();
        for row in rows {
            if !missing.contains_key(&row.measure) {
                continue;
            }
            let stats = row.to_stats();
            if let Some(columns) = columns.as_deref_mut() {
                columns.fold_bin(row.measure, &row.interval, Some(&stats))?;
            }
            by_measure
                .entry(row.measure)
                .or_default()
                .push((row.interval.from, stats));
        }

        let mut spans = Vec::new();
        for group in &request.groups {
            let bins = by_measure
                .get(&group.measure)
                .into_iter()
                .flatten()
                .filter(|(start, _)| group.interval.contains(*start))
                .copied();
            let span = AggregateSpan::from_bins(group.measure, group.interval, bin_width, bins);

            if let Some(columns) = columns.as_deref_mut() {
                for cell in span.bins().filter(|cell| cell.stats.is_none()) {
                    columns.fold_bin(group.measure, &cell.interval, None)?;
                }
            }
            spans.push(Arc::new(Span::from(span)));
        }

        Ok(FetchOutcome {
            kind: None,
            spans,
            io_points,
            ranges: 0,
        })
    }

    /// Exact fetch of `measures`: one M4 bin per pixel column
    ///
    /// The measures' columns are reset first, and every column is certified
    /// afterwards whether or not the source returned a row for it. Nothing is
    /// produced for the cache.
    pub fn fetch_exact(&self, columns: &mut PixelColumns, measures: &[MeasureId]) -> Result<FetchOutcome> {
        let mut request = AggregateRequest::new(AggregationMethod::M4);
        for &measure in measures {
            columns.reset_measure(measure)?;
            for idx in 0..columns.width() {
                let interval = columns.column_interval(idx);
                request.groups.push(BinGroup {
                    measure,
                    interval,
                    bin_width: interval.duration().max(1),
                });
            }
        }
        if request.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let rows = self.source.fetch_aggregated(&request)?;
        let io_points = rows.len() as u64;
        for row in rows {
            if measures.contains(&row.measure) {
                columns.fold_bin(row.measure, &row.interval, Some(&row.to_stats()))?;
            }
        }
        for &measure in measures {
            let whole = columns.interval();
            columns.certify(measure, &whole)?;
        }

        debug!(measures = ?measures, io_points, "Exact fallback fetched");
        metrics::record_fetch("exact", io_points);
        Ok(FetchOutcome {
            kind: Some(FetchKind::Aggregate),
            spans: Vec::new(),
            io_points,
            ranges: measures.len() * columns.width(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryDataSource;

    fn iv(from: i64, to: i64) -> TimeInterval {
        TimeInterval::new(from, to).unwrap()
    }

    fn source(step: i64, count: i64) -> Arc<InMemoryDataSource> {
        let points = (0..count)
            .map(|i| TimedValue::new(i * step, ((i * 13) % 17) as f64))
            .collect();
        Arc::new(InMemoryDataSource::new(step).with_measure(0, points))
    }

    fn missing(ranges: Vec<TimeInterval>) -> MissingRanges {
        let mut map = MissingRanges::new();
        map.insert(0, ranges);
        map
    }

    #[test]
    fn test_choose_kind() {
        let processor = DataProcessor::new(source(10, 10), ProcessorConfig::default());
        // 1000 ms at 10 ms sampling = 100 raw points; 4 * 10 columns * 6 = 240
        assert_eq!(processor.choose_kind(&missing(vec![iv(0, 1000)]), 100.0), FetchKind::Raw);
        // 300 raw points against 720 with 10 ms columns, 240 with 30 ms columns
        let sparse = DataProcessor::new(source(1, 10), ProcessorConfig::default());
        assert_eq!(sparse.choose_kind(&missing(vec![iv(0, 300)]), 10.0), FetchKind::Raw);
        assert_eq!(sparse.choose_kind(&missing(vec![iv(0, 300)]), 30.0), FetchKind::Aggregate);

        let dense = DataProcessor::new(source(1, 10), ProcessorConfig::default());
        // 1_000_000 raw points against 4 * 10 * 6 = 240
        assert_eq!(
            dense.choose_kind(&missing(vec![iv(0, 1_000_000)]), 100_000.0),
            FetchKind::Aggregate
        );
    }

    #[test]
    fn test_bin_width_respects_half_column() {
        let processor = DataProcessor::new(source(10, 10), ProcessorConfig::default());
        assert_eq!(processor.bin_width(100.0, 4.0), 25);
        assert_eq!(processor.bin_width(100.0, 1.0), 50);
        assert_eq!(processor.bin_width(1.0, 8.0), 1);
    }

    #[test]
    fn test_raw_fetch_folds_and_builds_spans() {
        let src = source(10, 100);
        let processor = DataProcessor::new(Arc::clone(&src), ProcessorConfig::default());
        let mut columns = PixelColumns::new(iv(0, 1000), 10, &[0]);

        let outcome = processor
            .fetch_missing(&mut columns, &missing(vec![iv(0, 300), iv(500, 700)]), 4.0, AggregationMethod::M4)
            .unwrap();
        assert_eq!(outcome.kind, Some(FetchKind::Raw));
        assert_eq!(outcome.spans.len(), 2);
        assert_eq!(outcome.io_points, 50);
        assert!(columns.columns()[0].is_resolved(0).unwrap());
        assert!(columns.columns()[6].is_resolved(0).unwrap());
        assert!(!columns.columns()[3].is_resolved(0).unwrap());
        assert_eq!(columns.columns()[0].stats().count(0).unwrap(), 10);
        assert_eq!(src.stats().raw_requests, 1);
    }

    #[test]
    fn test_aggregate_fetch_certifies_empty_bins() {
        // Sparse source: one sample every 1000 ms but nominal sampling 1 ms
        let points = vec![TimedValue::new(0, 1.0), TimedValue::new(50_000, 2.0)];
        let src = Arc::new(InMemoryDataSource::new(1).with_measure(0, points));
        let processor = DataProcessor::new(src, ProcessorConfig::default());
        let mut columns = PixelColumns::new(iv(0, 100_000), 10, &[0]);

        let outcome = processor
            .fetch_missing(&mut columns, &missing(vec![iv(0, 100_000)]), 4.0, AggregationMethod::M4)
            .unwrap();
        assert_eq!(outcome.kind, Some(FetchKind::Aggregate));
        assert_eq!(outcome.io_points, 2);
        assert_eq!(outcome.spans[0].bin_width(), Some(2500));
        for column in columns.columns() {
            assert!(column.is_resolved(0).unwrap());
        }
        assert_eq!(columns.columns()[5].stats().max_value(0).unwrap(), 2.0);
    }

    #[test]
    fn test_fetch_spans_leaves_columns_alone() {
        let processor = DataProcessor::new(source(10, 100), ProcessorConfig::default());
        let outcome = processor
            .fetch_spans(&missing(vec![iv(0, 500)]), 100.0, 4.0, AggregationMethod::M4)
            .unwrap();
        assert_eq!(outcome.spans.len(), 1);
        assert_eq!(outcome.ranges, 1);
    }

    #[test]
    fn test_exact_fetch_certifies_every_column() {
        let points = vec![TimedValue::new(150, 3.0)];
        let src = Arc::new(InMemoryDataSource::new(10).with_measure(0, points));
        let processor = DataProcessor::new(src, ProcessorConfig::default());
        let mut columns = PixelColumns::new(iv(0, 1000), 10, &[0]);

        let outcome = processor.fetch_exact(&mut columns, &[0]).unwrap();
        assert_eq!(outcome.io_points, 1);
        assert!(outcome.spans.is_empty());
        assert!(columns.columns().iter().all(|c| c.is_resolved(0).unwrap()));
        assert_eq!(columns.columns()[1].stats().max_value(0).unwrap(), 3.0);
        assert!(columns.columns()[2].is_empty_for(0).unwrap());
    }

    #[test]
    fn test_source_failure_propagates() {
        let src = source(10, 100);
        src.set_failing(true);
        let processor = DataProcessor::new(src, ProcessorConfig::default());
        let mut columns = PixelColumns::new(iv(0, 1000), 10, &[0]);
        let err = processor
            .fetch_missing(&mut columns, &missing(vec![iv(0, 1000)]), 4.0, AggregationMethod::M4)
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Source(_)));
    }
}

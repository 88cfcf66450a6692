//! Pixel columns and the folding protocol
//!
//! A query over `[from, to)` on a viewport `W` pixels wide is split into `W`
//! columns. Column `i` covers
//!
//! ```text
//! [from + floor(L * i / W), from + floor(L * (i + 1) / W))      L = to - from
//! ```
//!
//! so the columns tile the range exactly even when `L / W` is not integral.
//!
//! Every column keeps, per measure:
//!
//! - the statistics of all samples certainly inside it,
//! - the set of sub-intervals whose samples are all known (`covered`),
//! - the tightest bin crossing its left edge and its right edge.
//!
//! Bins fully inside a column are folded into its statistics. Bins crossing
//! an edge only bound the values near that edge and are kept as partial
//! candidates. Empty bins and raw spans certify every part of their interval
//! they overlap.

use crate::aggregation::{MeasureStats, StatsAggregator};
use crate::cache::span::{AggregateSpan, RawSpan, Span};
use crate::error::StatsError;
use crate::range_set::TimeRangeSet;
use crate::types::{MeasureId, TimeInterval, TimedValue};

// ============================================================================
// Partial Candidate
// ============================================================================

/// A non-empty bin crossing a column edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialCandidate {
    /// Interval of the bin
    pub interval: TimeInterval,
    /// Aggregate of the bin
    pub stats: MeasureStats,
}

impl PartialCandidate {
    fn offer(slot: &mut Option<PartialCandidate>, candidate: PartialCandidate) {
        match slot {
            Some(current) if current.interval.duration() <= candidate.interval.duration() => {}
            _ => *slot = Some(candidate),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CoverageTrack {
    covered: TimeRangeSet,
    left: Option<PartialCandidate>,
    right: Option<PartialCandidate>,
}

// ============================================================================
// Pixel Column
// ============================================================================

/// Accumulated knowledge about one pixel column
#[derive(Debug, Clone, PartialEq)]
pub struct PixelColumn {
    interval: TimeInterval,
    stats: StatsAggregator,
    /// Aligned with `stats.measures()`
    tracks: Vec<CoverageTrack>,
}

impl PixelColumn {
    /// Create an empty column for `measures`
    pub fn new(interval: TimeInterval, measures: &[MeasureId]) -> Self {
        let stats = StatsAggregator::new(measures);
        let tracks = vec![CoverageTrack::default(); stats.measures().len()];
        Self {
            interval,
            stats,
            tracks,
        }
    }

    /// Interval of the column
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Statistics of the samples certainly inside the column
    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    fn track(&self, measure: MeasureId) -> Result<&CoverageTrack, StatsError> {
        self.stats
            .measures()
            .binary_search(&measure)
            .map(|slot| &self.tracks[slot])
            .map_err(|_| StatsError::UnknownMeasure(measure))
    }

    fn track_mut(&mut self, measure: MeasureId) -> Result<&mut CoverageTrack, StatsError> {
        match self.stats.measures().binary_search(&measure) {
            Ok(slot) => Ok(&mut self.tracks[slot]),
            Err(_) => Err(StatsError::UnknownMeasure(measure)),
        }
    }

    /// Fold one raw sample
    pub fn add_point(&mut self, measure: MeasureId, sample: TimedValue) -> Result<(), StatsError> {
        if !self.interval.contains(sample.timestamp) {
            return Ok(());
        }
        self.stats.accept(measure, sample)
    }

    /// Certify that every sample of `interval` (clipped to the column) is known
    pub fn add_coverage(
        &mut self,
        measure: MeasureId,
        interval: &TimeInterval,
    ) -> Result<(), StatsError> {
        if let Some(clipped) = self.interval.intersection(interval) {
            self.track_mut(measure)?.covered.add(clipped);
        }
        Ok(())
    }

    /// Offer one bin of aggregated data
    ///
    /// - empty bin: certifies its overlap with the column
    /// - bin inside the column: folded and certified, unless any part of it is
    ///   already certified
    /// - bin crossing an edge: kept as a partial candidate if tighter than the
    ///   current one
    pub fn offer_bin(
        &mut self,
        measure: MeasureId,
        bin: &TimeInterval,
        stats: Option<&MeasureStats>,
    ) -> Result<(), StatsError> {
        if !self.interval.overlaps(bin) {
            return Ok(());
        }
        let Some(stats) = stats.filter(|s| !s.is_empty()) else {
            return self.add_coverage(measure, bin);
        };

        if self.interval.encloses(bin) {
            // Samples already counted may lie inside the bin
            if self.track(measure)?.covered.overlaps(bin) {
                return Ok(());
            }
            self.stats.accept_aggregated(measure, stats)?;
            self.track_mut(measure)?.covered.add(*bin);
            return Ok(());
        }

        let candidate = PartialCandidate {
            interval: *bin,
            stats: *stats,
        };
        let column = self.interval;
        let track = self.track_mut(measure)?;
        if bin.from < column.from {
            PartialCandidate::offer(&mut track.left, candidate);
        }
        if bin.to > column.to {
            PartialCandidate::offer(&mut track.right, candidate);
        }
        Ok(())
    }

    /// Forget everything known about `measure`
    pub fn reset_measure(&mut self, measure: MeasureId) -> Result<(), StatsError> {
        self.stats.reset(measure)?;
        *self.track_mut(measure)? = CoverageTrack::default();
        Ok(())
    }

    /// Certified sub-intervals of `measure`
    pub fn coverage(&self, measure: MeasureId) -> Result<&TimeRangeSet, StatsError> {
        Ok(&self.track(measure)?.covered)
    }

    /// Tightest bin crossing the left edge
    pub fn left_partial(&self, measure: MeasureId) -> Result<Option<&PartialCandidate>, StatsError> {
        Ok(self.track(measure)?.left.as_ref())
    }

    /// Tightest bin crossing the right edge
    pub fn right_partial(
        &self,
        measure: MeasureId,
    ) -> Result<Option<&PartialCandidate>, StatsError> {
        Ok(self.track(measure)?.right.as_ref())
    }

    /// Whether the error of `measure` can be bounded in this column
    ///
    /// The certified set must be a single piece; an uncovered head must lie
    /// inside the left candidate and an uncovered tail inside the right one.
    pub fn is_resolved(&self, measure: MeasureId) -> Result<bool, StatsError> {
        let track = self.track(measure)?;
        let Some(piece) = track.covered.single_piece() else {
            return Ok(false);
        };

        let head = TimeInterval::new_unchecked(self.interval.from, piece.from.max(self.interval.from));
        let tail = TimeInterval::new_unchecked(piece.to.min(self.interval.to), self.interval.to);

        let head_ok = head.is_empty()
            || track
                .left
                .is_some_and(|partial| partial.interval.encloses(&head));
        let tail_ok = tail.is_empty()
            || track
                .right
                .is_some_and(|partial| partial.interval.encloses(&tail));
        Ok(head_ok && tail_ok)
    }

    /// Whether the column holds no sample of `measure`
    pub fn is_empty_for(&self, measure: MeasureId) -> Result<bool, StatsError> {
        Ok(self.stats.count(measure)? == 0)
    }
}

// ============================================================================
// Pixel Columns
// ============================================================================

/// The `W` columns of one query
#[derive(Debug, Clone, PartialEq)]
pub struct PixelColumns {
    interval: TimeInterval,
    measures: Vec<MeasureId>,
    columns: Vec<PixelColumn>,
}

impl PixelColumns {
    /// Tile `interval` into `width` columns
    ///
    /// `width` must be at least 1 and at most the interval's duration.
    pub fn new(interval: TimeInterval, width: u32, measures: &[MeasureId]) -> Self {
        let width = width.max(1) as usize;
        let columns = (0..width)
            .map(|i| PixelColumn::new(Self::tile(&interval, width, i), measures))
            .collect();
        let mut measures = measures.to_vec();
        measures.sort_unstable();
        measures.dedup();
        Self {
            interval,
            measures,
            columns,
        }
    }

    fn tile(interval: &TimeInterval, width: usize, i: usize) -> TimeInterval {
        let len = interval.duration() as i128;
        let w = width as i128;
        let start = interval.from + (len * i as i128 / w) as i64;
        let end = interval.from + (len * (i as i128 + 1) / w) as i64;
        TimeInterval::new_unchecked(start, end)
    }

    /// Interval of the whole query
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Tracked measures, ascending
    pub fn measures(&self) -> &[MeasureId] {
        &self.measures
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column `idx`
    pub fn column(&self, idx: usize) -> Option<&PixelColumn> {
        self.columns.get(idx)
    }

    /// All columns in time order
    pub fn columns(&self) -> &[PixelColumn] {
        &self.columns
    }

    /// Interval of column `idx`
    pub fn column_interval(&self, idx: usize) -> TimeInterval {
        Self::tile(&self.interval, self.columns.len(), idx)
    }

    /// Index of the column containing `timestamp`
    ///
    /// Column `i` contains offset `d` iff `floor(L*i/W) <= d < floor(L*(i+1)/W)`,
    /// which gives `i = floor(((d + 1) * W - 1) / L)`.
    pub fn column_index(&self, timestamp: i64) -> Option<usize> {
        if !self.interval.contains(timestamp) {
            return None;
        }
        let len = self.interval.duration() as i128;
        let w = self.columns.len() as i128;
        let offset = (timestamp - self.interval.from) as i128;
        let idx = ((offset + 1) * w - 1) / len;
        Some((idx as usize).min(self.columns.len() - 1))
    }

    /// Indices of the columns overlapping `interval`
    pub fn columns_overlapping(&self, interval: &TimeInterval) -> std::ops::Range<usize> {
        match self.interval.intersection(interval) {
            Some(clipped) => match (
                self.column_index(clipped.from),
                self.column_index(clipped.to - 1),
            ) {
                (Some(first), Some(last)) => first..last + 1,
                _ => 0..0,
            },
            None => 0..0,
        }
    }

    /// Fold one raw sample into its column
    pub fn fold_point(&mut self, measure: MeasureId, sample: TimedValue) -> Result<(), StatsError> {
        match self.column_index(sample.timestamp) {
            Some(idx) => self.columns[idx].add_point(measure, sample),
            None => Ok(()),
        }
    }

    /// Offer one aggregated bin to every column it overlaps
    pub fn fold_bin(
        &mut self,
        measure: MeasureId,
        bin: &TimeInterval,
        stats: Option<&MeasureStats>,
    ) -> Result<(), StatsError> {
        for idx in self.columns_overlapping(bin) {
            self.columns[idx].offer_bin(measure, bin, stats)?;
        }
        Ok(())
    }

    /// Certify `interval` of `measure` in every column it overlaps
    pub fn certify(&mut self, measure: MeasureId, interval: &TimeInterval) -> Result<(), StatsError> {
        for idx in self.columns_overlapping(interval) {
            self.columns[idx].add_coverage(measure, interval)?;
        }
        Ok(())
    }

    /// Fold a cached or freshly built span
    pub fn fold_span(&mut self, span: &Span) -> Result<(), StatsError> {
        match span {
            Span::Raw(raw) => self.fold_raw_span(raw),
            Span::Aggregate(agg) => self.fold_aggregate_span(agg),
        }
    }

    /// Fold a raw span, then certify its whole interval
    ///
    /// Samples whose timestamp is already certified are skipped.
    pub fn fold_raw_span(&mut self, span: &RawSpan) -> Result<(), StatsError> {
        let measure = span.measure();
        for sample in span.points() {
            let Some(idx) = self.column_index(sample.timestamp) else {
                continue;
            };
            let column = &mut self.columns[idx];
            if !column.coverage(measure)?.contains(sample.timestamp) {
                column.add_point(measure, *sample)?;
            }
        }
        self.certify(measure, &span.interval())
    }

    /// Fold every cell of an aggregate span
    pub fn fold_aggregate_span(&mut self, span: &AggregateSpan) -> Result<(), StatsError> {
        let range = match self.interval.intersection(&span.interval()) {
            Some(clipped) => clipped,
            None => return Ok(()),
        };
        let first = span.index_of(range.from).unwrap_or(0);
        let last = span
            .index_of(range.to - 1)
            .unwrap_or_else(|| span.size().saturating_sub(1));

        for idx in first..=last.min(span.size().saturating_sub(1)) {
            let bin = span.bin_interval(idx);
            self.fold_bin(span.measure(), &bin, span.bin(idx))?;
        }
        Ok(())
    }

    /// Forget `measure` in every column overlapping `interval`
    ///
    /// Used before folding freshly fetched data for a column-aligned range,
    /// which then replaces whatever the cache contributed there.
    pub fn reset_range(&mut self, measure: MeasureId, interval: &TimeInterval) -> Result<(), StatsError> {
        for idx in self.columns_overlapping(interval) {
            self.columns[idx].reset_measure(measure)?;
        }
        Ok(())
    }

    /// Forget everything known about `measure` in every column
    pub fn reset_measure(&mut self, measure: MeasureId) -> Result<(), StatsError> {
        for column in &mut self.columns {
            column.reset_measure(measure)?;
        }
        Ok(())
    }

    /// Smallest and largest value of `measure` over all columns
    pub fn value_bounds(&self, measure: MeasureId) -> Result<Option<(f64, f64)>, StatsError> {
        let mut bounds: Option<(f64, f64)> = None;
        for column in &self.columns {
            if column.is_empty_for(measure)? {
                continue;
            }
            let lo = column.stats().min_value(measure)?;
            let hi = column.stats().max_value(measure)?;
            bounds = Some(match bounds {
                Some((min, max)) => (min.min(lo), max.max(hi)),
                None => (lo, hi),
            });
        }
        Ok(bounds)
    }
}

//! Maximum rendering error per pixel column
//!
//! Values are mapped to pixel rows with
//!
//! ```text
//! row(v) = floor(height * (v - min) / (max - min))      clamped to [0, height - 1]
//! ```
//!
//! where `min`/`max` span every column of the query. For each resolved
//! column the evaluator derives two row ranges:
//!
//! - **certain**: rows the rendering is known to touch (the column's own
//!   min..max, plus the connecting line segments when both their endpoints
//!   are exact samples),
//! - **possible**: rows the rendering might touch given the partial bins
//!   at the column edges and uncertain line endpoints.
//!
//! The error is the number of possible rows that are not certain. Columns
//! that cannot be bounded at all are reported as `None`.

use crate::aggregation::MeasureStats;
use crate::error::StatsError;
use crate::query::pixel_column::{PixelColumn, PixelColumns};
use crate::types::{MeasureId, TimedValue};

/// Inclusive range of pixel rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// Lowest row
    pub lo: u32,
    /// Highest row
    pub hi: u32,
}

impl RowRange {
    /// Range spanning both rows, in any order
    pub fn between(a: u32, b: u32) -> Self {
        Self {
            lo: a.min(b),
            hi: a.max(b),
        }
    }

    /// Number of rows
    pub fn len(&self) -> u32 {
        self.hi - self.lo + 1
    }

    /// Smallest range enclosing both
    pub fn hull(&self, other: &RowRange) -> RowRange {
        RowRange {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }
}

fn extend(acc: Option<RowRange>, range: RowRange) -> Option<RowRange> {
    Some(match acc {
        Some(current) => current.hull(&range),
        None => range,
    })
}

/// Value-to-row mapping of one measure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowScale {
    min: f64,
    max: f64,
    height: u32,
}

impl RowScale {
    /// Scale mapping `[min, max]` onto `height` rows
    pub fn new(min: f64, max: f64, height: u32) -> Self {
        Self {
            min,
            max,
            height: height.max(1),
        }
    }

    /// Row of value `v`
    pub fn pixel_id(&self, v: f64) -> u32 {
        let span = self.max - self.min;
        if span <= 0.0 || !span.is_finite() {
            return 0;
        }
        let row = (self.height as f64 * (v - self.min) / span).floor();
        if row.is_nan() || row < 0.0 {
            0
        } else {
            (row as u64).min(self.height as u64 - 1) as u32
        }
    }

    fn rows(&self, lo: f64, hi: f64) -> RowRange {
        RowRange::between(self.pixel_id(lo), self.pixel_id(hi))
    }

    fn stats_rows(&self, stats: &MeasureStats) -> Option<RowRange> {
        Some(self.rows(stats.min()?.value, stats.max()?.value))
    }
}

/// What one column knows about one measure
#[derive(Debug, Clone, Copy)]
struct ColumnView {
    resolved: bool,
    stats: Option<MeasureStats>,
    head_exact: bool,
    tail_exact: bool,
    left: Option<MeasureStats>,
    right: Option<MeasureStats>,
}

impl ColumnView {
    fn of(column: &PixelColumn, measure: MeasureId) -> Result<Self, StatsError> {
        let resolved = column.is_resolved(measure)?;
        let stats = Some(*column.stats().measure_stats(measure)?).filter(|s| !s.is_empty());
        let interval = column.interval();
        let piece = column.coverage(measure)?.single_piece();
        Ok(Self {
            resolved,
            stats,
            head_exact: resolved && stats.is_some() && piece.is_some_and(|p| p.from <= interval.from),
            tail_exact: resolved && stats.is_some() && piece.is_some_and(|p| p.to >= interval.to),
            left: column.left_partial(measure)?.map(|p| p.stats),
            right: column.right_partial(measure)?.map(|p| p.stats),
        })
    }

    fn first(&self) -> Option<TimedValue> {
        self.stats.and_then(|s| s.first())
    }

    fn last(&self) -> Option<TimedValue> {
        self.stats.and_then(|s| s.last())
    }
}

/// Value of the segment `a -> b` at time `t`
fn interpolate(a: TimedValue, b: TimedValue, t: i64) -> f64 {
    if b.timestamp == a.timestamp {
        return b.value;
    }
    let ratio = (t - a.timestamp) as f64 / (b.timestamp - a.timestamp) as f64;
    a.value + (b.value - a.value) * ratio
}

/// Per-column, per-measure error counts
#[derive(Debug, Clone, PartialEq)]
pub struct MaxErrorReport {
    measures: Vec<MeasureId>,
    /// `columns[i][k]` is the error of measure `measures[k]` in column `i`
    columns: Vec<Vec<Option<u32>>>,
}

impl MaxErrorReport {
    /// Measures, ascending
    pub fn measures(&self) -> &[MeasureId] {
        &self.measures
    }

    /// Error counts of every column, `None` where the column is missing
    pub fn columns(&self) -> &[Vec<Option<u32>>] {
        &self.columns
    }

    /// Error of `measure` in column `idx`
    pub fn error(&self, idx: usize, measure: MeasureId) -> Option<u32> {
        let slot = self.measures.binary_search(&measure).ok()?;
        self.columns.get(idx).and_then(|errors| errors[slot])
    }
}

/// Computes [`MaxErrorReport`]s for a set of pixel columns
#[derive(Debug, Clone, Copy)]
pub struct MaxErrorEvaluator {
    height: u32,
}

impl MaxErrorEvaluator {
    /// Evaluator for a viewport `height` rows tall
    pub fn new(height: u32) -> Self {
        Self {
            height: height.max(1),
        }
    }

    /// Evaluate every column for every measure
    pub fn evaluate(&self, columns: &PixelColumns) -> Result<MaxErrorReport, StatsError> {
        let measures = columns.measures().to_vec();
        let mut result = vec![vec![None; measures.len()]; columns.width()];

        for (slot, &measure) in measures.iter().enumerate() {
            let views = columns
                .columns()
                .iter()
                .map(|c| ColumnView::of(c, measure))
                .collect::<Result<Vec<_>, _>>()?;

            let scale = match columns.value_bounds(measure)? {
                Some((min, max)) => RowScale::new(min, max, self.height),
                None => RowScale::new(0.0, 0.0, self.height),
            };

            for (idx, view) in views.iter().enumerate() {
                if !view.resolved {
                    continue;
                }
                let prev = idx.checked_sub(1).map(|i| &views[i]);
                let next = views.get(idx + 1);
                let column = &columns.columns()[idx];
                result[idx][slot] = Some(self.column_error(&scale, column, view, prev, next));
            }
        }

        Ok(MaxErrorReport {
            measures,
            columns: result,
        })
    }

    fn column_error(
        &self,
        scale: &RowScale,
        column: &PixelColumn,
        view: &ColumnView,
        prev: Option<&ColumnView>,
        next: Option<&ColumnView>,
    ) -> u32 {
        let interval = column.interval();
        let mut certain = view.stats.as_ref().and_then(|s| scale.stats_rows(s));
        let mut possible = certain;

        for partial in view.left.iter().chain(view.right.iter()) {
            if let Some(rows) = scale.stats_rows(partial) {
                possible = extend(possible, rows);
            }
        }

        // Segment arriving from the previous column
        if let Some(prev) = prev {
            match (prev.last(), view.first()) {
                (Some(a), Some(b)) if prev.tail_exact && view.head_exact => {
                    let rows = scale.rows(interpolate(a, b, interval.from), b.value);
                    certain = extend(certain, rows);
                    possible = extend(possible, rows);
                }
                _ => {
                    let candidates = [prev.stats, prev.right, view.left];
                    if let Some(rows) = Self::endpoint_rows(scale, &candidates, view.first()) {
                        possible = extend(possible, rows);
                    }
                }
            }
        }

        // Segment leaving towards the next column
        if let Some(next) = next {
            match (view.last(), next.first()) {
                (Some(a), Some(b)) if view.tail_exact && next.head_exact => {
                    let rows = scale.rows(a.value, interpolate(a, b, interval.to));
                    certain = extend(certain, rows);
                    possible = extend(possible, rows);
                }
                _ => {
                    let candidates = [next.stats, next.left, view.right];
                    if let Some(rows) = Self::endpoint_rows(scale, &candidates, view.last()) {
                        possible = extend(possible, rows);
                    }
                }
            }
        }

        let certain_rows = certain.map_or(0, |r| r.len());
        let possible_rows = possible.map_or(0, |r| r.len());
        possible_rows.saturating_sub(certain_rows)
    }

    /// Hull of every value an uncertain segment endpoint might take
    ///
    /// Returns `None` when nothing is known on the far side, in which case no
    /// segment is drawn.
    fn endpoint_rows(
        scale: &RowScale,
        far_side: &[Option<MeasureStats>],
        own_endpoint: Option<TimedValue>,
    ) -> Option<RowRange> {
        let mut far: Option<RowRange> = None;
        for stats in far_side.iter().flatten() {
            if let Some(rows) = scale.stats_rows(stats) {
                far = extend(far, rows);
            }
        }
        let far = far?;
        Some(match own_endpoint {
            Some(point) => far.hull(&RowRange::between(
                scale.pixel_id(point.value),
                scale.pixel_id(point.value),
            )),
            None => far,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::span::{AggregateSpan, RawSpan};
    use crate::types::TimeInterval;

    fn iv(from: i64, to: i64) -> TimeInterval {
        TimeInterval::new(from, to).unwrap()
    }

    fn tv(timestamp: i64, value: f64) -> TimedValue {
        TimedValue::new(timestamp, value)
    }

    #[test]
    fn test_pixel_id_clamps() {
        let scale = RowScale::new(0.0, 10.0, 100);
        assert_eq!(scale.pixel_id(0.0), 0);
        assert_eq!(scale.pixel_id(5.0), 50);
        assert_eq!(scale.pixel_id(10.0), 99);
        assert_eq!(scale.pixel_id(-3.0), 0);
        assert_eq!(scale.pixel_id(42.0), 99);
        assert_eq!(RowScale::new(3.0, 3.0, 100).pixel_id(3.0), 0);
    }

    #[test]
    fn test_unresolved_columns_are_missing() {
        let mut columns = PixelColumns::new(iv(0, 100), 4, &[0]);
        columns
            .fold_raw_span(&RawSpan::new(0, iv(0, 50), vec![tv(10, 1.0), tv(30, 2.0)]))
            .unwrap();
        let report = MaxErrorEvaluator::new(10).evaluate(&columns).unwrap();
        assert!(report.error(0, 0).is_some());
        assert!(report.error(1, 0).is_some());
        assert_eq!(report.error(2, 0), None);
        assert_eq!(report.error(3, 0), None);
    }

    #[test]
    fn test_exact_raw_data_has_no_error() {
        let points: Vec<TimedValue> = (0..100).map(|i| tv(i, (i % 7) as f64)).collect();
        let mut columns = PixelColumns::new(iv(0, 100), 10, &[0]);
        columns.fold_raw_span(&RawSpan::new(0, iv(0, 100), points)).unwrap();
        let report = MaxErrorEvaluator::new(50).evaluate(&columns).unwrap();
        for idx in 0..10 {
            assert_eq!(report.error(idx, 0), Some(0), "column {}", idx);
        }
    }

    #[test]
    fn test_partial_bins_add_error() {
        // Bins of 30ms over 2 columns of 50ms: bin [30, 60) straddles the boundary
        let points = vec![tv(5, 0.0), tv(40, 10.0), tv(70, 5.0)];
        let span = AggregateSpan::from_points(0, iv(0, 100), 30, &points);
        let mut columns = PixelColumns::new(iv(0, 100), 2, &[0]);
        columns.fold_aggregate_span(&span).unwrap();

        assert!(columns.columns()[0].is_resolved(0).unwrap());
        assert!(columns.columns()[1].is_resolved(0).unwrap());

        let report = MaxErrorEvaluator::new(10).evaluate(&columns).unwrap();
        // The straddling bin holds the global max, which no column certifies
        assert!(report.error(0, 0).unwrap() > 0);
        assert!(report.error(1, 0).unwrap() > 0);
    }

    #[test]
    fn test_row_range_len() {
        assert_eq!(RowRange::between(7, 3).len(), 5);
        assert_eq!(RowRange::between(2, 2).hull(&RowRange::between(9, 9)).len(), 8);
    }
}

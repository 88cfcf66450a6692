//! Normalized per-measure error and missing-range extraction
//!
//! Two modes are built on the per-column counts of the
//! [`MaxErrorEvaluator`]:
//!
//! - [`ErrorMode::ValidColumns`]: error summed over resolved columns only and
//!   normalized by `height * valid_columns`. Unresolved columns are returned
//!   as coalesced, column-aligned missing ranges per measure.
//! - [`ErrorMode::Total`]: error summed over all `width` columns and
//!   normalized by `height * width`. A column that is still unresolved counts
//!   as `height` rows of error; no missing ranges are produced.
//!
//! A measure has error when its normalized error exceeds `1 - accuracy`. The
//! comparison is done as `error + accuracy > 1`, since `1 - accuracy` is not
//! exact in floating point (`1 - 0.9 < 0.1`).

use crate::error::StatsError;
use crate::query::max_error::{MaxErrorEvaluator, MaxErrorReport};
use crate::query::pixel_column::PixelColumns;
use crate::types::{MeasureId, TimeInterval};
use serde::Serialize;
use std::collections::BTreeMap;

/// Whether a normalized `error` is above the tolerance of `accuracy`
pub fn exceeds_tolerance(error: f64, accuracy: f64) -> bool {
    error + accuracy > 1.0 + f64::EPSILON
}

/// Which columns count towards the error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Only resolved columns; missing ranges are reported
    ValidColumns,
    /// Every column; unresolved columns count as maximal error
    Total,
}

/// Error of one measure
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasureError {
    /// Measure
    pub measure: MeasureId,
    /// Normalized error in `[0, 1]`
    pub error: f64,
    /// Whether `error` exceeds the tolerance
    pub has_error: bool,
    /// Columns counted in the normalization
    pub counted_columns: usize,
}

/// Outcome of one error calculation
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    mode: ErrorMode,
    measures: Vec<MeasureError>,
    missing: BTreeMap<MeasureId, Vec<TimeInterval>>,
}

impl ErrorReport {
    /// Mode the report was computed in
    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// Per-measure errors, ascending by measure
    pub fn measures(&self) -> &[MeasureError] {
        &self.measures
    }

    /// Error of `measure`
    pub fn measure(&self, measure: MeasureId) -> Option<&MeasureError> {
        self.measures.iter().find(|m| m.measure == measure)
    }

    /// Normalized error of `measure`, 0 for unknown measures
    pub fn error(&self, measure: MeasureId) -> f64 {
        self.measure(measure).map_or(0.0, |m| m.error)
    }

    /// Whether `measure` exceeds the tolerance
    pub fn has_error(&self, measure: MeasureId) -> bool {
        self.measure(measure).is_some_and(|m| m.has_error)
    }

    /// Measures exceeding the tolerance
    pub fn erroring_measures(&self) -> Vec<MeasureId> {
        self.measures
            .iter()
            .filter(|m| m.has_error)
            .map(|m| m.measure)
            .collect()
    }

    /// Whether any measure exceeds the tolerance
    pub fn any_error(&self) -> bool {
        self.measures.iter().any(|m| m.has_error)
    }

    /// Column-aligned missing ranges per measure (valid-columns mode only)
    pub fn missing_ranges(&self) -> &BTreeMap<MeasureId, Vec<TimeInterval>> {
        &self.missing
    }

    /// Whether any range is missing
    pub fn has_missing(&self) -> bool {
        self.missing.values().any(|ranges| !ranges.is_empty())
    }

    /// Total number of missing ranges
    pub fn missing_range_count(&self) -> usize {
        self.missing.values().map(Vec::len).sum()
    }
}

/// Turns column errors into per-measure decisions
#[derive(Debug, Clone, Copy)]
pub struct ErrorCalculator {
    evaluator: MaxErrorEvaluator,
    height: u32,
    accuracy: f64,
}

impl ErrorCalculator {
    /// Calculator for a viewport `height` rows tall and `accuracy` in `[0, 1]`
    pub fn new(height: u32, accuracy: f64) -> Self {
        let height = height.max(1);
        Self {
            evaluator: MaxErrorEvaluator::new(height),
            height,
            accuracy,
        }
    }

    /// Largest normalized error still accepted
    pub fn tolerance(&self) -> f64 {
        (1.0 - self.accuracy).max(0.0)
    }

    /// Compute the report for `columns` in `mode`
    pub fn calculate(&self, columns: &PixelColumns, mode: ErrorMode) -> Result<ErrorReport, StatsError> {
        let report = self.evaluator.evaluate(columns)?;
        Ok(self.summarize(columns, &report, mode))
    }

    fn summarize(&self, columns: &PixelColumns, report: &MaxErrorReport, mode: ErrorMode) -> ErrorReport {
        let width = columns.width();
        let mut measures = Vec::with_capacity(report.measures().len());
        let mut missing = BTreeMap::new();

        for (slot, &measure) in report.measures().iter().enumerate() {
            let mut total: u64 = 0;
            let mut valid = 0usize;
            let mut ranges: Vec<TimeInterval> = Vec::new();

            for (idx, errors) in report.columns().iter().enumerate() {
                match errors[slot] {
                    Some(rows) => {
                        total += rows as u64;
                        valid += 1;
                    }
                    None => match mode {
                        ErrorMode::Total => total += self.height as u64,
                        ErrorMode::ValidColumns => {
                            let interval = columns.column_interval(idx);
                            match ranges.last_mut() {
                                Some(last) if last.to == interval.from => last.to = interval.to,
                                _ => ranges.push(interval),
                            }
                        }
                    },
                }
            }

            let counted = match mode {
                ErrorMode::ValidColumns => valid,
                ErrorMode::Total => width,
            };
            let error = if counted == 0 {
                1.0
            } else {
                (total as f64 / (self.height as f64 * counted as f64)).min(1.0)
            };

            measures.push(MeasureError {
                measure,
                error,
                has_error: exceeds_tolerance(error, self.accuracy),
                counted_columns: counted,
            });
            if mode == ErrorMode::ValidColumns {
                missing.insert(measure, ranges);
            }
        }

        ErrorReport {
            mode,
            measures,
            missing,
        }
    }
}

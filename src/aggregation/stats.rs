//! Running statistics for pixel columns and aggregate bins
//!
//! `MeasureStats` is the single-measure accumulator (count, sum, and the
//! min/max/first/last samples with their timestamps). It doubles as the
//! payload of one aggregate bin, so folding a cached bin into a column is a
//! plain merge.
//!
//! `StatsAggregator` tracks a fixed, sorted set of measures and rejects any
//! attempt to mix in values for measures outside that set.
//!
//! # Tie-breaking
//!
//! All comparisons are strict (`<` / `>`), so when two candidates tie on the
//! compared quantity the value that was accepted first is kept. This holds
//! for min, max (ties on value) and first, last (ties on timestamp), both for
//! single samples and for merged aggregates.

use crate::error::StatsError;
use crate::types::{MeasureId, TimedValue};
use serde::Serialize;

// ============================================================================
// Measure Stats
// ============================================================================

/// Aggregate of the samples of one measure
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasureStats {
    count: u64,
    sum: f64,
    min: TimedValue,
    max: TimedValue,
    first: TimedValue,
    last: TimedValue,
}

impl MeasureStats {
    /// Create an empty accumulator
    pub fn new() -> Self {
        let placeholder = TimedValue::new(0, f64::NAN);
        Self {
            count: 0,
            sum: 0.0,
            min: placeholder,
            max: placeholder,
            first: placeholder,
            last: placeholder,
        }
    }

    /// Accumulator holding a single sample
    pub fn from_value(sample: TimedValue) -> Self {
        let mut stats = Self::new();
        stats.accept(sample);
        stats
    }

    /// Build stats from already-aggregated parts
    ///
    /// Used for bins returned by a backend. `count` must be at least one.
    pub fn from_parts(
        count: u64,
        sum: f64,
        min: TimedValue,
        max: TimedValue,
        first: TimedValue,
        last: TimedValue,
    ) -> Self {
        debug_assert!(count > 0, "aggregate parts with zero count");
        Self {
            count,
            sum,
            min,
            max,
            first,
            last,
        }
    }

    /// Fold one raw sample in
    pub fn accept(&mut self, sample: TimedValue) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
            self.first = sample;
            self.last = sample;
        } else {
            if sample.value < self.min.value {
                self.min = sample;
            }
            if sample.value > self.max.value {
                self.max = sample;
            }
            if sample.timestamp < self.first.timestamp {
                self.first = sample;
            }
            if sample.timestamp > self.last.timestamp {
                self.last = sample;
            }
        }
        self.count += 1;
        self.sum += sample.value;
    }

    /// Merge another aggregate in, weighting by its count
    pub fn merge(&mut self, other: &MeasureStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        if other.min.value < self.min.value {
            self.min = other.min;
        }
        if other.max.value > self.max.value {
            self.max = other.max;
        }
        if other.first.timestamp < self.first.timestamp {
            self.first = other.first;
        }
        if other.last.timestamp > self.last.timestamp {
            self.last = other.last;
        }
        self.count += other.count;
        self.sum += other.sum;
    }

    /// Number of samples folded in
    pub fn count(&self) -> u64 {
        self.count
    }

    /// True when no sample has been folded in
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sum of all samples
    pub fn sum(&self) -> Option<f64> {
        (self.count > 0).then_some(self.sum)
    }

    /// Sample with the smallest value
    pub fn min(&self) -> Option<TimedValue> {
        (self.count > 0).then_some(self.min)
    }

    /// Sample with the largest value
    pub fn max(&self) -> Option<TimedValue> {
        (self.count > 0).then_some(self.max)
    }

    /// Earliest sample
    pub fn first(&self) -> Option<TimedValue> {
        (self.count > 0).then_some(self.first)
    }

    /// Latest sample
    pub fn last(&self) -> Option<TimedValue> {
        (self.count > 0).then_some(self.last)
    }

    /// Arithmetic mean
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl Default for MeasureStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Stats Aggregator
// ============================================================================

/// Mutable accumulator over a fixed set of measures
#[derive(Debug, Clone, PartialEq)]
pub struct StatsAggregator {
    /// Tracked measures, sorted and deduplicated
    measures: Vec<MeasureId>,

    /// One accumulator per tracked measure, aligned with `measures`
    stats: Vec<MeasureStats>,
}

impl StatsAggregator {
    /// Create an empty aggregator for the given measures
    pub fn new(measures: &[MeasureId]) -> Self {
        let mut measures = measures.to_vec();
        measures.sort_unstable();
        measures.dedup();
        let stats = vec![MeasureStats::new(); measures.len()];
        Self { measures, stats }
    }

    /// Tracked measures in ascending order
    pub fn measures(&self) -> &[MeasureId] {
        &self.measures
    }

    fn slot(&self, measure: MeasureId) -> Result<usize, StatsError> {
        self.measures
            .binary_search(&measure)
            .map_err(|_| StatsError::UnknownMeasure(measure))
    }

    /// Fold one raw sample of `measure` in
    pub fn accept(&mut self, measure: MeasureId, sample: TimedValue) -> Result<(), StatsError> {
        let slot = self.slot(measure)?;
        self.stats[slot].accept(sample);
        Ok(())
    }

    /// Fold one aggregated bin of `measure` in
    ///
    /// The bin is weighted by its own count; its extremes are merged by
    /// comparison instead of being re-derived from raw data.
    pub fn accept_aggregated(
        &mut self,
        measure: MeasureId,
        bin: &MeasureStats,
    ) -> Result<(), StatsError> {
        let slot = self.slot(measure).map_err(|_| StatsError::MeasureMismatch {
            expected: self.measures.clone(),
            actual: vec![measure],
        })?;
        self.stats[slot].merge(bin);
        Ok(())
    }

    /// Merge another aggregator over the same measure set
    pub fn combine(&mut self, other: &StatsAggregator) -> Result<(), StatsError> {
        if self.measures != other.measures {
            return Err(StatsError::MeasureMismatch {
                expected: self.measures.clone(),
                actual: other.measures.clone(),
            });
        }
        for (mine, theirs) in self.stats.iter_mut().zip(&other.stats) {
            mine.merge(theirs);
        }
        Ok(())
    }

    /// Discard everything accepted for `measure`
    pub fn reset(&mut self, measure: MeasureId) -> Result<(), StatsError> {
        let slot = self.slot(measure)?;
        self.stats[slot] = MeasureStats::new();
        Ok(())
    }

    /// Raw accumulator for `measure`
    pub fn measure_stats(&self, measure: MeasureId) -> Result<&MeasureStats, StatsError> {
        let slot = self.slot(measure)?;
        Ok(&self.stats[slot])
    }

    fn non_empty(&self, measure: MeasureId) -> Result<&MeasureStats, StatsError> {
        let stats = self.measure_stats(measure)?;
        if stats.is_empty() {
            return Err(StatsError::Empty { measure });
        }
        Ok(stats)
    }

    /// Number of samples accepted for `measure` (zero is not an error)
    pub fn count(&self, measure: MeasureId) -> Result<u64, StatsError> {
        Ok(self.measure_stats(measure)?.count())
    }

    /// True when no measure has accepted anything
    pub fn is_empty(&self) -> bool {
        self.stats.iter().all(MeasureStats::is_empty)
    }

    /// Sum for `measure`
    pub fn sum(&self, measure: MeasureId) -> Result<f64, StatsError> {
        Ok(self.non_empty(measure)?.sum)
    }

    /// Average for `measure`
    pub fn average(&self, measure: MeasureId) -> Result<f64, StatsError> {
        let stats = self.non_empty(measure)?;
        Ok(stats.sum / stats.count as f64)
    }

    /// Smallest value of `measure`
    pub fn min_value(&self, measure: MeasureId) -> Result<f64, StatsError> {
        Ok(self.non_empty(measure)?.min.value)
    }

    /// Timestamp of the smallest value of `measure`
    pub fn min_timestamp(&self, measure: MeasureId) -> Result<i64, StatsError> {
        Ok(self.non_empty(measure)?.min.timestamp)
    }

    /// Largest value of `measure`
    pub fn max_value(&self, measure: MeasureId) -> Result<f64, StatsError> {
        Ok(self.non_empty(measure)?.max.value)
    }

    /// Timestamp of the largest value of `measure`
    pub fn max_timestamp(&self, measure: MeasureId) -> Result<i64, StatsError> {
        Ok(self.non_empty(measure)?.max.timestamp)
    }

    /// Earliest value of `measure`
    pub fn first_value(&self, measure: MeasureId) -> Result<f64, StatsError> {
        Ok(self.non_empty(measure)?.first.value)
    }

    /// Timestamp of the earliest value of `measure`
    pub fn first_timestamp(&self, measure: MeasureId) -> Result<i64, StatsError> {
        Ok(self.non_empty(measure)?.first.timestamp)
    }

    /// Latest value of `measure`
    pub fn last_value(&self, measure: MeasureId) -> Result<f64, StatsError> {
        Ok(self.non_empty(measure)?.last.value)
    }

    /// Timestamp of the latest value of `measure`
    pub fn last_timestamp(&self, measure: MeasureId) -> Result<i64, StatsError> {
        Ok(self.non_empty(measure)?.last.timestamp)
    }
}

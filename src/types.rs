//! Core data types used throughout the visualization cache
//!
//! # Key Types
//!
//! - **`TimeInterval`**: half-open `[from, to)` window in epoch milliseconds
//! - **`TimedValue`**: a single `(timestamp, value)` sample
//! - **`MeasureId`**: index of a measure (column) of the multi-measure series
//! - **`ValueRange`**: optional per-measure value filter applied when rendering
//! - **`AggregationMethod`**: reduction strategy requested from a backend
//!
//! # Example
//!
//! ```rust
//! use kuba_vizcache::types::TimeInterval;
//!
//! let a = TimeInterval::new(0, 100).unwrap();
//! let b = TimeInterval::new(50, 200).unwrap();
//! assert!(a.overlaps(&b));
//! assert_eq!(a.percentage(&b), 50.0 / 150.0);
//! assert!(TimeInterval::new(10, 5).is_err());
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a measure within a multi-measure time series
pub type MeasureId = u32;

/// Half-open time interval `[from, to)` in epoch milliseconds
///
/// Intervals are totally ordered by `(from, to)`. A zero-length interval
/// (`from == to`) contains no timestamp and overlaps nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Start timestamp in milliseconds (inclusive)
    pub from: i64,

    /// End timestamp in milliseconds (exclusive)
    pub to: i64,
}

impl TimeInterval {
    /// Create a new interval, rejecting `from > to`
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(Error::InvalidInterval { from, to });
        }
        Ok(Self { from, to })
    }

    /// Create an interval without validation
    ///
    /// Only use this when `from <= to` is already guaranteed by construction.
    pub fn new_unchecked(from: i64, to: i64) -> Self {
        debug_assert!(from <= to, "interval from {} > to {}", from, to);
        Self { from, to }
    }

    /// Length of the interval in milliseconds, saturating at `i64::MAX`
    pub fn duration(&self) -> i64 {
        self.to.saturating_sub(self.from)
    }

    /// True when the interval contains no timestamp
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Check if `from <= timestamp < to`
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.from && timestamp < self.to
    }

    /// Check whether the two intervals share at least one timestamp
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.from < other.to && other.from < self.to
    }

    /// Check whether `other` lies entirely inside this interval
    pub fn encloses(&self, other: &TimeInterval) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// Check whether the intervals touch without overlapping
    pub fn is_adjacent(&self, other: &TimeInterval) -> bool {
        self.to == other.from || other.to == self.from
    }

    /// Fraction of `other` that is covered by this interval, in `[0, 1]`
    pub fn percentage(&self, other: &TimeInterval) -> f64 {
        if other.is_empty() {
            return if self.contains(other.from) { 1.0 } else { 0.0 };
        }
        match self.intersection(other) {
            Some(common) => common.duration() as f64 / other.duration() as f64,
            None => 0.0,
        }
    }

    /// Overlapping part of both intervals, if any
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        if from < to {
            Some(TimeInterval { from, to })
        } else {
            None
        }
    }

    /// Smallest interval enclosing both
    pub fn hull(&self, other: &TimeInterval) -> TimeInterval {
        TimeInterval {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// A single timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,

    /// Measurement value
    pub value: f64,
}

impl TimedValue {
    /// Create a new timed value
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Inclusive value window used to suppress columns while rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Lower bound (inclusive)
    pub min: f64,

    /// Upper bound (inclusive)
    pub max: f64,
}

impl ValueRange {
    /// Create a new value range
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when `[lo, hi]` lies fully inside the range
    pub fn encloses(&self, lo: f64, hi: f64) -> bool {
        lo >= self.min && hi <= self.max
    }
}

/// Reduction strategy a backend applies when returning aggregated bins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// First, min, max and last per bin (exact for line rendering)
    #[default]
    M4,

    /// Min and max per bin only; first/last are derived from their order
    MinMax,
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMethod::M4 => write!(f, "m4"),
            AggregationMethod::MinMax => write!(f, "minmax"),
        }
    }
}

//! Visualization query definition
//!
//! A query asks for the M4 rendering of a set of measures over `[from, to)`
//! on a `width x height` pixel viewport, with at most `1 - accuracy` of the
//! pixel rows per measure left unconfirmed.
//!
//! # Example
//!
//! ```rust
//! use kuba_vizcache::query::ast::QueryBuilder;
//! use kuba_vizcache::types::ValueRange;
//!
//! let query = QueryBuilder::new()
//!     .range(0, 1000)
//!     .measures([2, 0, 2])
//!     .viewport(10, 100)
//!     .accuracy(0.95)
//!     .filter(0, ValueRange::new(-5.0, 5.0))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(query.measures(), &[0, 2]);
//! assert_eq!(query.pixel_column_interval(), 100.0);
//! ```

use crate::error::{Error, Result};
use crate::types::{AggregationMethod, MeasureId, TimeInterval, ValueRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validated visualization query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    interval: TimeInterval,
    measures: Vec<MeasureId>,
    width: u32,
    height: u32,
    accuracy: f64,
    filters: BTreeMap<MeasureId, ValueRange>,
    method: AggregationMethod,
}

impl Query {
    /// Queried time range
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Start of the queried range
    pub fn from(&self) -> i64 {
        self.interval.from
    }

    /// End of the queried range (exclusive)
    pub fn to(&self) -> i64 {
        self.interval.to
    }

    /// Requested measures, sorted and deduplicated
    pub fn measures(&self) -> &[MeasureId] {
        &self.measures
    }

    /// Viewport width in pixel columns
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Viewport height in pixel rows
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Requested accuracy in `[0, 1]`
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Largest normalized error still accepted, `1 - accuracy`
    pub fn error_tolerance(&self) -> f64 {
        (1.0 - self.accuracy).max(0.0)
    }

    /// Whether a normalized `error` is above the tolerance of this query
    pub fn exceeds_tolerance(&self, error: f64) -> bool {
        crate::query::error_calculator::exceeds_tolerance(error, self.accuracy)
    }

    /// Aggregation method used for backend fetches
    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    /// Value filter of `measure`, if any
    pub fn filter(&self, measure: MeasureId) -> Option<&ValueRange> {
        self.filters.get(&measure)
    }

    /// Milliseconds per pixel column, as a real number
    pub fn pixel_column_interval(&self) -> f64 {
        self.interval.duration() as f64 / self.width as f64
    }
}

/// Fluent builder for [`Query`]
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    range: Option<(i64, i64)>,
    measures: Vec<MeasureId>,
    width: u32,
    height: u32,
    accuracy: f64,
    filters: BTreeMap<MeasureId, ValueRange>,
    method: AggregationMethod,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            range: None,
            measures: Vec::new(),
            width: 0,
            height: 0,
            accuracy: 0.95,
            filters: BTreeMap::new(),
            method: AggregationMethod::default(),
        }
    }
}

impl QueryBuilder {
    /// Create a new builder (accuracy defaults to 0.95)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queried range `[from, to)`
    pub fn range(mut self, from: i64, to: i64) -> Self {
        self.range = Some((from, to));
        self
    }

    /// Set the queried range from an interval
    pub fn interval(self, interval: TimeInterval) -> Self {
        self.range(interval.from, interval.to)
    }

    /// Add one measure
    pub fn measure(mut self, measure: MeasureId) -> Self {
        self.measures.push(measure);
        self
    }

    /// Add several measures
    pub fn measures(mut self, measures: impl IntoIterator<Item = MeasureId>) -> Self {
        self.measures.extend(measures);
        self
    }

    /// Set the viewport size in pixels
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the requested accuracy
    pub fn accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Add a value filter for `measure`
    pub fn filter(mut self, measure: MeasureId, range: ValueRange) -> Self {
        self.filters.insert(measure, range);
        self
    }

    /// Set the backend aggregation method
    pub fn method(mut self, method: AggregationMethod) -> Self {
        self.method = method;
        self
    }

    /// Validate and build the query
    pub fn build(self) -> Result<Query> {
        let (from, to) = self
            .range
            .ok_or_else(|| Error::InvalidQuery("time range is required".to_string()))?;
        if from >= to {
            return Err(Error::InvalidQuery(format!(
                "time range [{}, {}) is empty or inverted",
                from, to
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidQuery(format!(
                "viewport {}x{} must be at least 1x1",
                self.width, self.height
            )));
        }
        let duration = to.checked_sub(from).ok_or_else(|| {
            Error::InvalidQuery(format!(
                "time range [{}, {}) is longer than {} ms",
                from,
                to,
                i64::MAX
            ))
        })?;
        if duration < self.width as i64 {
            return Err(Error::InvalidQuery(format!(
                "time range of {} ms is narrower than {} pixel columns",
                duration, self.width
            )));
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(Error::InvalidQuery(format!(
                "accuracy {} outside [0, 1]",
                self.accuracy
            )));
        }

        let mut measures = self.measures;
        measures.sort_unstable();
        measures.dedup();
        if measures.is_empty() {
            return Err(Error::InvalidQuery("at least one measure is required".to_string()));
        }

        for (measure, range) in &self.filters {
            if !measures.contains(measure) {
                return Err(Error::InvalidQuery(format!(
                    "filter given for unrequested measure {}",
                    measure
                )));
            }
            if range.min > range.max {
                return Err(Error::InvalidQuery(format!(
                    "filter of measure {} has min {} above max {}",
                    measure, range.min, range.max
                )));
            }
        }

        Ok(Query {
            interval: TimeInterval::new(from, to)?,
            measures,
            width: self.width,
            height: self.height,
            accuracy: self.accuracy,
            filters: self.filters,
            method: self.method,
        })
    }
}

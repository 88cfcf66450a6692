//! Error types for the visualization cache

use crate::types::MeasureId;
use thiserror::Error;

/// Main error type for the cache and query engine
#[derive(Error, Debug)]
pub enum Error {
    /// Statistics aggregator contract violation
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    /// External data source failure
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    /// Query failed validation before execution
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Time interval with `from > to`
    #[error("Invalid time interval: from {from} > to {to}")]
    InvalidInterval {
        /// Interval start (epoch ms)
        from: i64,
        /// Interval end (epoch ms)
        to: i64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Result or configuration (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Errors raised by [`StatsAggregator`](crate::aggregation::StatsAggregator)
///
/// Both variants indicate a programming-contract violation rather than a
/// user-facing failure: reading a statistic before any data was folded, or
/// merging aggregates built over different measure sets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    /// A statistic was read while no value had been accepted for the measure
    #[error("Empty aggregator: no values accepted for measure {measure}")]
    Empty {
        /// The measure that was read
        measure: MeasureId,
    },

    /// Two aggregates over different measure sets were combined
    #[error("Measure mismatch: expected {expected:?}, got {actual:?}")]
    MeasureMismatch {
        /// Measures tracked by the receiving aggregator
        expected: Vec<MeasureId>,
        /// Measures of the value being merged in
        actual: Vec<MeasureId>,
    },

    /// A measure that the aggregator does not track was addressed
    #[error("Unknown measure: {0}")]
    UnknownMeasure(MeasureId),
}

/// Errors raised by a [`DataSource`](crate::source::DataSource)
///
/// An empty result set is never an error: absence of rows means "no data".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The backend could not be reached or failed mid-query
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request shape
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

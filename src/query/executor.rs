//! Query executor - progressive, error-bounded answering
//!
//! One query runs through a fixed sequence of states:
//!
//! ```text
//! ┌──────────────┐
//! │     INIT     │  W empty pixel columns over [from, to)
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │  CACHE_FOLD  │  eligible cached spans, finest first
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │ ERROR_CHECK_1│  valid-columns mode: error + missing ranges
//! └──────┬───────┘  (error => double the aggregation factor)
//! ┌──────▼───────┐
//! │ FETCH_MISSING│  raw or aggregated, folded while read,
//! │  FETCH_FOLD  │  new spans inserted into the cache
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │ ERROR_CHECK_2│  total mode
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │EXACT_FALLBACK│  one M4 bin per column for measures still in error
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │   RESPOND    │  first/min/max/last per column, summary, error
//! └──────┬───────┘
//!        ▼
//!    prefetch (cache warming, failures only logged)
//! ```
//!
//! Source failures abort the query; no cache-only answer is substituted.

use crate::cache::{CacheManager, Span};
use crate::error::Result;
use crate::metrics;
use crate::query::ast::Query;
use crate::query::error_calculator::{ErrorCalculator, ErrorMode};
use crate::query::pixel_column::PixelColumns;
use crate::query::prefetch::{PrefetchConfig, PrefetchManager, PrefetchStats};
use crate::query::processor::{DataProcessor, FetchKind, MissingRanges, ProcessorConfig};
use crate::query::result::{
    MeasureResult, QueryResults, QueryTimings, Resolution, SummaryStats,
};
use crate::source::DataSource;
use crate::types::{MeasureId, TimeInterval, TimedValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Aggregation factor used when no cached aggregate informs it (default: 4.0)
    pub initial_aggregation_factor: f64,

    /// Upper bound for the doubled aggregation factor (default: 64.0)
    pub max_aggregation_factor: f64,

    /// Run the exact per-column fetch for measures still in error (default: true)
    pub exact_fallback: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            initial_aggregation_factor: 4.0,
            max_aggregation_factor: 64.0,
            exact_fallback: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial aggregation factor
    pub fn with_initial_aggregation_factor(mut self, factor: f64) -> Self {
        self.initial_aggregation_factor = factor.max(1.0);
        self
    }

    /// Set the maximum aggregation factor
    pub fn with_max_aggregation_factor(mut self, factor: f64) -> Self {
        self.max_aggregation_factor = factor.max(1.0);
        self
    }

    /// Disable the exact fallback fetch
    pub fn without_exact_fallback(mut self) -> Self {
        self.exact_fallback = false;
        self
    }
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Counters shared by every execution
#[derive(Debug, Default)]
pub struct ExecutionStats {
    queries: AtomicU64,
    failed: AtomicU64,
    fetch_rounds: AtomicU64,
    exact_fallbacks: AtomicU64,
    io_points: AtomicU64,
    cached_spans: AtomicU64,
}

/// Snapshot of [`ExecutionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStatsSnapshot {
    /// Queries answered
    pub queries: u64,
    /// Queries failed
    pub failed: u64,
    /// Missing-data fetch rounds
    pub fetch_rounds: u64,
    /// Exact fallbacks run
    pub exact_fallbacks: u64,
    /// Rows read from the source for queries
    pub io_points: u64,
    /// Cached spans folded
    pub cached_spans: u64,
}

impl ExecutionStats {
    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fetch_rounds: self.fetch_rounds.load(Ordering::Relaxed),
            exact_fallbacks: self.exact_fallbacks.load(Ordering::Relaxed),
            io_points: self.io_points.load(Ordering::Relaxed),
            cached_spans: self.cached_spans.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// Answers visualization queries from the cache and a data source
pub struct QueryExecutor<S: DataSource> {
    cache: Arc<CacheManager>,
    processor: DataProcessor<S>,
    prefetch: PrefetchManager<S>,
    config: ExecutorConfig,
    stats: ExecutionStats,
}

impl<S: DataSource> QueryExecutor<S> {
    /// Create an executor with default configuration
    pub fn new(source: Arc<S>, cache: Arc<CacheManager>) -> Self {
        Self::with_config(
            source,
            cache,
            ExecutorConfig::default(),
            ProcessorConfig::default(),
            PrefetchConfig::default(),
        )
    }

    /// Create an executor with explicit configuration
    pub fn with_config(
        source: Arc<S>,
        cache: Arc<CacheManager>,
        config: ExecutorConfig,
        processor_config: ProcessorConfig,
        prefetch_config: PrefetchConfig,
    ) -> Self {
        let processor = DataProcessor::new(source, processor_config);
        let prefetch = PrefetchManager::new(processor.clone(), Arc::clone(&cache), prefetch_config);
        Self {
            cache,
            processor,
            prefetch,
            config,
            stats: ExecutionStats::default(),
        }
    }

    /// Shared cache
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Execution counters
    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Prefetch counters
    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.prefetch.stats()
    }

    /// Execute one query
    pub fn execute(&self, query: &Query) -> Result<QueryResults> {
        let start = Instant::now();
        match self.run(query, start) {
            Ok(results) => {
                self.stats.queries.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .io_points
                    .fetch_add(results.io_points, Ordering::Relaxed);
                let outcome = if results.has_error() { "error_bound_exceeded" } else { "ok" };
                metrics::record_query(outcome, start.elapsed().as_secs_f64());
                info!(
                    interval = %query.interval(),
                    width = query.width(),
                    measures = query.measures().len(),
                    io_points = results.io_points,
                    has_error = results.has_error(),
                    duration_ms = results.timings.total.as_millis() as u64,
                    "Query answered"
                );

                self.prefetch.prefetch(query, results.aggregation_factor);
                Ok(results)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_query("failed", start.elapsed().as_secs_f64());
                warn!(interval = %query.interval(), error = %e, "Query failed");
                Err(e)
            }
        }
    }

    fn run(&self, query: &Query, start: Instant) -> Result<QueryResults> {
        let interval = query.interval();
        let pci = query.pixel_column_interval();

        // INIT
        let mut columns = PixelColumns::new(interval, query.width(), query.measures());

        // CACHE_FOLD
        let mut spans = self.cache.get_from_cache(&interval, query.measures(), pci);
        spans.sort_by_key(|span| span.bin_width().unwrap_or(0));
        for span in &spans {
            columns.fold_span(span)?;
        }
        self.stats
            .cached_spans
            .fetch_add(spans.len() as u64, Ordering::Relaxed);

        let estimated = estimate_aggregation_factor(&spans, &interval, pci);
        let mut aggregation_factor = estimated
            .unwrap_or(self.config.initial_aggregation_factor)
            .clamp(1.0, self.config.max_aggregation_factor);
        debug!(spans = spans.len(), estimated_factor = ?estimated, "Cache folded");

        // ERROR_CHECK_1
        let calculator = ErrorCalculator::new(query.height(), query.accuracy());
        let first = calculator.calculate(&columns, ErrorMode::ValidColumns)?;
        let erroring = first.erroring_measures();

        let mut missing: MissingRanges = first
            .missing_ranges()
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .map(|(&m, ranges)| (m, ranges.clone()))
            .collect();
        if !erroring.is_empty() {
            aggregation_factor = (aggregation_factor * 2.0).min(self.config.max_aggregation_factor);
            for &measure in &erroring {
                missing.entry(measure).or_insert_with(|| vec![interval]);
            }
        }
        debug!(
            erroring = ?erroring,
            missing_ranges = first.missing_range_count(),
            aggregation_factor,
            "Valid-columns error checked"
        );

        // FETCH_MISSING / FETCH_FOLD
        let mut io_points = 0;
        let mut fetch_kind: Option<FetchKind> = None;
        let fetch_start = Instant::now();
        if !missing.is_empty() {
            let outcome =
                self.processor
                    .fetch_missing(&mut columns, &missing, aggregation_factor, query.method())?;
            io_points += outcome.io_points;
            fetch_kind = outcome.kind;
            self.cache.add_all_to_cache(outcome.spans);
            self.stats.fetch_rounds.fetch_add(1, Ordering::Relaxed);
        }
        let fetch = fetch_start.elapsed();

        // ERROR_CHECK_2
        let second = calculator.calculate(&columns, ErrorMode::Total)?;
        let mut errors: BTreeMap<MeasureId, (f64, bool, Resolution)> = second
            .measures()
            .iter()
            .map(|m| (m.measure, (m.error, m.has_error, Resolution::Bounded)))
            .collect();

        // EXACT_FALLBACK
        let mut fallback: Option<Duration> = None;
        let still_erroring = second.erroring_measures();
        if self.config.exact_fallback && !still_erroring.is_empty() {
            let fallback_start = Instant::now();
            let outcome = self.processor.fetch_exact(&mut columns, &still_erroring)?;
            io_points += outcome.io_points;
            for &measure in &still_erroring {
                let mut empty_columns = Vec::new();
                for (idx, column) in columns.columns().iter().enumerate() {
                    if column.is_empty_for(measure)? {
                        empty_columns.push(idx);
                    }
                }
                errors.insert(measure, (0.0, false, Resolution::Exact { empty_columns }));
            }
            self.stats.exact_fallbacks.fetch_add(1, Ordering::Relaxed);
            metrics::record_exact_fallback();
            fallback = Some(fallback_start.elapsed());
            debug!(measures = ?still_erroring, io_points = outcome.io_points, "Exact fallback applied");
        }

        // RESPOND
        let mut measures = Vec::with_capacity(query.measures().len());
        for &measure in query.measures() {
            let (error, has_error, resolution) = errors
                .remove(&measure)
                .unwrap_or((0.0, false, Resolution::Bounded));
            let (points, summary) = render(&columns, query, measure)?;
            measures.push(MeasureResult {
                measure,
                points,
                summary,
                error,
                has_error,
                resolution,
            });
        }

        Ok(QueryResults {
            interval,
            width: query.width(),
            height: query.height(),
            measures,
            timings: QueryTimings {
                total: start.elapsed(),
                fetch,
                fallback,
            },
            io_points,
            aggregation_factor,
            cached_spans: spans.len(),
            fetch_kind,
        })
    }
}

/// Coverage-weighted mean of `pixel_column_interval / g` over aggregate spans
fn estimate_aggregation_factor(
    spans: &[Arc<Span>],
    interval: &TimeInterval,
    pixel_column_interval: f64,
) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for span in spans {
        let Some(g) = span.bin_width() else {
            continue;
        };
        let Some(overlap) = span.interval().intersection(interval) else {
            continue;
        };
        let weight = overlap.duration() as f64;
        weighted += weight * pixel_column_interval / g as f64;
        weights += weight;
    }
    (weights > 0.0).then(|| weighted / weights)
}

/// M4 points and summary of one measure
fn render(
    columns: &PixelColumns,
    query: &Query,
    measure: MeasureId,
) -> Result<(Vec<TimedValue>, SummaryStats)> {
    let filter = query.filter(measure);
    let mut points = Vec::new();
    let mut summary = SummaryStats::default();

    for column in columns.columns() {
        let stats = *column.stats().measure_stats(measure)?;
        let (Some(first), Some(min), Some(max), Some(last), Some(sum)) =
            (stats.first(), stats.min(), stats.max(), stats.last(), stats.sum())
        else {
            continue;
        };
        if filter.is_some_and(|f| !f.encloses(min.value, max.value)) {
            continue;
        }

        let mut column_points = [first, min, max, last];
        column_points.sort_by_key(|p| p.timestamp);
        for point in column_points {
            if points.last().is_some_and(|prev: &TimedValue| prev.timestamp == point.timestamp) {
                continue;
            }
            points.push(point);
        }

        summary.count += stats.count();
        summary.sum += sum;
        summary.min = Some(summary.min.map_or(min.value, |m| m.min(min.value)));
        summary.max = Some(summary.max.map_or(max.value, |m| m.max(max.value)));
    }

    Ok((points, summary))
}

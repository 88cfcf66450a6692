//! Speculative cache warming around answered queries
//!
//! After a query over `[from, to)` on `W` columns, the manager extends the
//! range by `round(prefetch_factor * W / 2)` columns on each side of the
//! same column grid, clamps the extension to the source's time range, drops
//! every column already covered by an eligible cached span, and fetches the
//! rest straight into the cache. Nothing is folded into live columns and
//! failures are logged, never returned.

use crate::cache::CacheManager;
use crate::metrics;
use crate::query::ast::Query;
use crate::query::processor::{DataProcessor, MissingRanges};
use crate::range_set::TimeRangeSet;
use crate::source::DataSource;
use crate::types::TimeInterval;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefetch configuration
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Run prefetching after each query (default: true)
    pub enabled: bool,

    /// Extension in viewport widths, split over both sides (default: 1.0)
    pub prefetch_factor: f64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefetch_factor: 1.0,
        }
    }
}

impl PrefetchConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefetch factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.prefetch_factor = factor.max(0.0);
        self
    }

    /// Disable prefetching
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// What one prefetch run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Disabled, zero extension, or everything already cached
    Skipped,

    /// Data fetched into the cache
    Fetched {
        /// Ranges fetched
        ranges: usize,
        /// Spans inserted
        spans: usize,
        /// Rows read from the source
        io_points: u64,
    },

    /// The source failed; the error was logged
    Failed,
}

/// Prefetch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Runs that fetched data
    pub runs: u64,
    /// Runs skipped
    pub skipped: u64,
    /// Runs that failed
    pub failures: u64,
    /// Spans inserted
    pub spans_inserted: u64,
}

/// Warms the cache around answered queries
pub struct PrefetchManager<S: DataSource> {
    processor: DataProcessor<S>,
    cache: Arc<CacheManager>,
    config: PrefetchConfig,
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    spans_inserted: AtomicU64,
}

impl<S: DataSource> PrefetchManager<S> {
    /// Create a manager feeding `cache`
    pub fn new(processor: DataProcessor<S>, cache: Arc<CacheManager>, config: PrefetchConfig) -> Self {
        Self {
            processor,
            cache,
            config,
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            spans_inserted: AtomicU64::new(0),
        }
    }

    /// Counters
    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            runs: self.runs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            spans_inserted: self.spans_inserted.load(Ordering::Relaxed),
        }
    }

    /// Columns added on each side
    pub fn extension_columns(&self, width: u32) -> i64 {
        (self.config.prefetch_factor * width as f64 / 2.0).round() as i64
    }

    /// Left and right extension ranges of `query`, clamped to the source
    pub fn extension(&self, query: &Query) -> (Option<TimeInterval>, Option<TimeInterval>) {
        let columns = self.extension_columns(query.width());
        if columns <= 0 {
            return (None, None);
        }

        let bounds = self.processor.source().time_range();
        let width = query.width() as i64;
        let left = TimeInterval::new_unchecked(grid_edge(query, -columns), query.from());
        let right = TimeInterval::new_unchecked(query.to(), grid_edge(query, width + columns));
        (left.intersection(&bounds), right.intersection(&bounds))
    }

    /// Warm the cache around `query`
    pub fn prefetch(&self, query: &Query, aggregation_factor: f64) -> PrefetchOutcome {
        if !self.config.enabled {
            return self.skip();
        }
        let (left, right) = self.extension(query);
        let pci = query.pixel_column_interval();

        let mut missing = MissingRanges::new();
        for extension in [left, right].into_iter().flatten() {
            let cached = self.cache.get_from_cache(&extension, query.measures(), pci);
            for &measure in query.measures() {
                let mut covered = TimeRangeSet::new();
                for span in cached.iter().filter(|s| s.measure() == measure) {
                    covered.add(span.interval());
                }
                let ranges = missing.entry(measure).or_default();
                for column in grid_columns(query, &extension) {
                    if covered.encloses(&column) {
                        continue;
                    }
                    match ranges.last_mut() {
                        Some(last) if last.to == column.from => last.to = column.to,
                        _ => ranges.push(column),
                    }
                }
            }
        }
        missing.retain(|_, ranges| !ranges.is_empty());
        if missing.is_empty() {
            return self.skip();
        }

        match self
            .processor
            .fetch_spans(&missing, pci, aggregation_factor, query.method())
        {
            Ok(outcome) => {
                let spans = outcome.spans.len();
                self.cache.add_all_to_cache(outcome.spans);
                self.runs.fetch_add(1, Ordering::Relaxed);
                self.spans_inserted
                    .fetch_add(spans as u64, Ordering::Relaxed);
                metrics::record_prefetch("fetched");
                debug!(
                    ranges = outcome.ranges,
                    spans,
                    io_points = outcome.io_points,
                    "Prefetch warmed cache"
                );
                PrefetchOutcome::Fetched {
                    ranges: outcome.ranges,
                    spans,
                    io_points: outcome.io_points,
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_prefetch("failed");
                warn!(error = %e, interval = %query.interval(), "Prefetch failed");
                PrefetchOutcome::Failed
            }
        }
    }

    fn skip(&self) -> PrefetchOutcome {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        metrics::record_prefetch("skipped");
        PrefetchOutcome::Skipped
    }
}

/// Start of grid column `j` of `query`, for any (possibly negative) `j`
fn grid_edge(query: &Query, j: i64) -> i64 {
    let len = query.interval().duration() as i128;
    let width = query.width() as i128;
    query.from() + (len * j as i128).div_euclid(width) as i64
}

/// Grid columns of `query` overlapping `range`, clipped to it
fn grid_columns(query: &Query, range: &TimeInterval) -> Vec<TimeInterval> {
    let len = query.interval().duration() as i128;
    let width = query.width() as i128;
    // First column whose end lies beyond range.from
    let offset = (range.from - query.from()) as i128;
    let mut j = ((offset + 1) * width - 1).div_euclid(len) as i64;

    let mut columns = Vec::new();
    loop {
        let start = grid_edge(query, j);
        if start >= range.to {
            break;
        }
        let end = grid_edge(query, j + 1);
        if let Some(clipped) = TimeInterval::new_unchecked(start, end).intersection(range) {
            columns.push(clipped);
        }
        j += 1;
    }
    columns
}

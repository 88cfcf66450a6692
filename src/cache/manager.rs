//! Span cache manager
//!
//! Owns the [`IntervalIndex`] behind a single `parking_lot::RwLock`; lookups
//! share the read lock and inserts take the write lock.
//!
//! # Granularity filter
//!
//! `get_from_cache` only hands out spans whose bin width `g` satisfies
//! `pixel_column_interval >= 2 * g`. With that bound a single bin can cross at
//! most one pixel-column boundary, so folding touches at most two adjacent
//! columns per bin.

use crate::cache::index::IntervalIndex;
use crate::cache::span::Span;
use crate::metrics;
use crate::types::{MeasureId, TimeInterval};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Cache Statistics
// ============================================================================

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total lookups
    pub lookups: AtomicU64,

    /// Spans handed out by lookups
    pub spans_served: AtomicU64,

    /// Overlapping spans rejected by the granularity or measure filter
    pub spans_rejected: AtomicU64,

    /// Raw spans inserted
    pub raw_spans: AtomicU64,

    /// Aggregate spans inserted
    pub aggregate_spans: AtomicU64,

    /// Approximate bytes held by inserted spans
    pub bytes: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Total lookups
    pub lookups: u64,
    /// Spans handed out by lookups
    pub spans_served: u64,
    /// Overlapping spans rejected by the filters
    pub spans_rejected: u64,
    /// Raw spans inserted
    pub raw_spans: u64,
    /// Aggregate spans inserted
    pub aggregate_spans: u64,
    /// Approximate bytes held
    pub bytes: u64,
}

impl CacheStats {
    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            spans_served: self.spans_served.load(Ordering::Relaxed),
            spans_rejected: self.spans_rejected.load(Ordering::Relaxed),
            raw_spans: self.raw_spans.load(Ordering::Relaxed),
            aggregate_spans: self.aggregate_spans.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Cache Manager
// ============================================================================

/// Shared, append-only cache of spans
#[derive(Default)]
pub struct CacheManager {
    index: RwLock<IntervalIndex>,
    stats: CacheStats,
}

impl CacheManager {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans usable for a query over `interval` and `measures`
    ///
    /// Returns every cached span that overlaps `interval`, belongs to one of
    /// `measures`, and is fine enough for `pixel_column_interval`.
    pub fn get_from_cache(
        &self,
        interval: &TimeInterval,
        measures: &[MeasureId],
        pixel_column_interval: f64,
    ) -> Vec<Arc<Span>> {
        let overlapping = self.index.read().overlapping(interval);
        let total = overlapping.len();

        let eligible: Vec<Arc<Span>> = overlapping
            .into_iter()
            .filter(|span| {
                measures.contains(&span.measure()) && span.is_eligible(pixel_column_interval)
            })
            .collect();

        let rejected = (total - eligible.len()) as u64;
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        self.stats
            .spans_served
            .fetch_add(eligible.len() as u64, Ordering::Relaxed);
        self.stats
            .spans_rejected
            .fetch_add(rejected, Ordering::Relaxed);
        metrics::record_cache_lookup(eligible.len(), rejected as usize);

        debug!(
            interval = %interval,
            pixel_column_interval,
            served = eligible.len(),
            rejected,
            "Cache lookup"
        );
        eligible
    }

    /// Insert one span; never rejects, merges or evicts
    pub fn add_to_cache(&self, span: Arc<Span>) {
        self.record_insert(&span);
        let stored = {
            let mut index = self.index.write();
            index.insert(span);
            index.len()
        };
        metrics::update_cached_spans(stored);
    }

    /// Insert several spans under a single write lock
    pub fn add_all_to_cache<I>(&self, spans: I)
    where
        I: IntoIterator<Item = Arc<Span>>,
    {
        let spans: Vec<Arc<Span>> = spans.into_iter().collect();
        if spans.is_empty() {
            return;
        }
        for span in &spans {
            self.record_insert(span);
        }
        let stored = {
            let mut index = self.index.write();
            index.insert_all(spans);
            index.len()
        };
        metrics::update_cached_spans(stored);
    }

    fn record_insert(&self, span: &Span) {
        if span.interval().is_empty() {
            return;
        }
        let counter = if span.is_raw() {
            &self.stats.raw_spans
        } else {
            &self.stats.aggregate_spans
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(span.estimated_size_bytes() as u64, Ordering::Relaxed);
        metrics::record_span_inserted(span.is_raw());
    }

    /// Number of spans stored
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

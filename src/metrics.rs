//! Metrics for the visualization cache
//!
//! Prometheus counters, histograms and gauges covering query outcomes, cache
//! lookups and inserts, source fetches, exact fallbacks and prefetching.
//!
//! Recording is on by default and follows `monitoring.metrics_enabled` once
//! [`configure`] has been called.

use crate::config::MonitoringConfig;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

lazy_static! {
    // === Queries ===

    /// Queries by outcome
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "vizcache_queries_total",
        "Total visualization queries by outcome",
        &["outcome"]
    ).unwrap();

    /// Query duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "vizcache_query_duration_seconds",
        "Query latency in seconds",
        &["outcome"],
        vec![0.0005, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Exact fallback fetches
    pub static ref EXACT_FALLBACKS_TOTAL: Counter = register_counter!(
        "vizcache_exact_fallbacks_total",
        "Queries that needed an exact per-column fetch"
    ).unwrap();

    // === Cache ===

    /// Spans handed out or rejected by lookups
    pub static ref CACHE_SPANS_TOTAL: CounterVec = register_counter_vec!(
        "vizcache_cache_spans_total",
        "Spans returned by cache lookups, by result",
        &["result"]
    ).unwrap();

    /// Spans inserted by kind
    pub static ref SPANS_INSERTED_TOTAL: CounterVec = register_counter_vec!(
        "vizcache_spans_inserted_total",
        "Spans inserted into the cache",
        &["kind"]
    ).unwrap();

    /// Spans currently cached
    pub static ref CACHED_SPANS: Gauge = register_gauge!(
        "vizcache_cached_spans",
        "Number of spans held by the cache"
    ).unwrap();

    // === Source ===

    /// Rows read from the data source by fetch kind
    pub static ref FETCHED_POINTS_TOTAL: CounterVec = register_counter_vec!(
        "vizcache_fetched_points_total",
        "Rows read from the data source",
        &["kind"]
    ).unwrap();

    /// Prefetch runs by outcome
    pub static ref PREFETCH_TOTAL: CounterVec = register_counter_vec!(
        "vizcache_prefetch_total",
        "Prefetch runs by outcome",
        &["outcome"]
    ).unwrap();
}

/// Initialize metrics
///
/// Forces registration of every metric so a scrape before the first query
/// still lists them.
pub fn init() {
    lazy_static::initialize(&QUERIES_TOTAL);
    lazy_static::initialize(&QUERY_DURATION);
    lazy_static::initialize(&EXACT_FALLBACKS_TOTAL);
    lazy_static::initialize(&CACHE_SPANS_TOTAL);
    lazy_static::initialize(&SPANS_INSERTED_TOTAL);
    lazy_static::initialize(&FETCHED_POINTS_TOTAL);
    lazy_static::initialize(&PREFETCH_TOTAL);
    CACHED_SPANS.set(0.0);

    tracing::info!("Metrics system initialized");
}

/// Apply the monitoring configuration
pub fn configure(config: &MonitoringConfig) {
    set_enabled(config.metrics_enabled);
    if config.metrics_enabled {
        init();
    } else {
        tracing::info!("Metrics recording disabled");
    }
}

/// Turn recording on or off for the whole process
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether `record_*` calls update the registry
#[inline]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished query
#[inline]
pub fn record_query(outcome: &str, duration_secs: f64) {
    if !is_enabled() {
        return;
    }
    QUERIES_TOTAL.with_label_values(&[outcome]).inc();
    QUERY_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record an exact fallback
#[inline]
pub fn record_exact_fallback() {
    if !is_enabled() {
        return;
    }
    EXACT_FALLBACKS_TOTAL.inc();
}

/// Record one cache lookup
#[inline]
pub fn record_cache_lookup(served: usize, rejected: usize) {
    if !is_enabled() {
        return;
    }
    CACHE_SPANS_TOTAL
        .with_label_values(&["served"])
        .inc_by(served as f64);
    CACHE_SPANS_TOTAL
        .with_label_values(&["rejected"])
        .inc_by(rejected as f64);
}

/// Record one span insert
#[inline]
pub fn record_span_inserted(raw: bool) {
    if !is_enabled() {
        return;
    }
    let kind = if raw { "raw" } else { "aggregate" };
    SPANS_INSERTED_TOTAL.with_label_values(&[kind]).inc();
}

/// Update the cached span gauge
#[inline]
pub fn update_cached_spans(count: usize) {
    if !is_enabled() {
        return;
    }
    CACHED_SPANS.set(count as f64);
}

/// Record rows read from the source
#[inline]
pub fn record_fetch(kind: &str, rows: u64) {
    if !is_enabled() {
        return;
    }
    FETCHED_POINTS_TOTAL
        .with_label_values(&[kind])
        .inc_by(rows as f64);
}

/// Record a prefetch run
#[inline]
pub fn record_prefetch(outcome: &str) {
    if !is_enabled() {
        return;
    }
    PREFETCH_TOTAL.with_label_values(&[outcome]).inc();
}

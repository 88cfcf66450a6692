//! End-to-end tests for the query executor
//!
//! Covers cache folding, missing-range fetches, the exact fallback,
//! prefetch warming, source failures and concurrent execution against the
//! in-memory data source.

use kuba_vizcache::cache::span::{AggregateSpan, RawSpan};
use kuba_vizcache::cache::CacheManager;
use kuba_vizcache::config::Config;
use kuba_vizcache::error::{Error, SourceError};
use kuba_vizcache::query::{
    ExecutorConfig, FetchKind, PixelColumns, PrefetchConfig, ProcessorConfig, QueryBuilder,
    QueryExecutor, Resolution,
};
use kuba_vizcache::source::InMemoryDataSource;
use kuba_vizcache::types::{TimeInterval, TimedValue};
use std::sync::Arc;
use std::thread;

fn iv(from: i64, to: i64) -> TimeInterval {
    TimeInterval::new(from, to).unwrap()
}

/// One sample every `step` ms over `[0, count * step)`
fn series(count: i64, step: i64) -> Vec<TimedValue> {
    (0..count)
        .map(|i| TimedValue::new(i * step, ((i * 13) % 29) as f64 / 2.0))
        .collect()
}

fn executor_without_prefetch(
    source: &Arc<InMemoryDataSource>,
    cache: &Arc<CacheManager>,
) -> QueryExecutor<InMemoryDataSource> {
    QueryExecutor::with_config(
        Arc::clone(source),
        Arc::clone(cache),
        ExecutorConfig::default(),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    )
}

// ============================================================================
// CACHE FOLDING
// ============================================================================

/// A raw point folded next to an eligible g=40 aggregate span lands in column 4
#[test]
fn test_raw_point_folds_into_covered_column() {
    let background: Vec<TimedValue> = (0..100).map(|i| TimedValue::new(i * 10, 1.0)).collect();
    let span = AggregateSpan::from_points(0, iv(0, 1000), 40, &background);

    let cache = CacheManager::new();
    cache.add_to_cache(Arc::new(span.into()));
    let spans = cache.get_from_cache(&iv(0, 1000), &[0], 100.0);
    assert_eq!(spans.len(), 1);

    let mut columns = PixelColumns::new(iv(0, 1000), 10, &[0]);
    for span in &spans {
        columns.fold_span(span).unwrap();
    }
    columns.fold_point(0, TimedValue::new(450, 7.0)).unwrap();

    let column = columns.column(4).unwrap();
    assert_eq!(column.interval(), iv(400, 500));
    assert_eq!(column.stats().max_value(0).unwrap(), 7.0);
    assert_eq!(column.stats().min_value(0).unwrap(), 1.0);
    assert_eq!(columns.column(3).unwrap().stats().max_value(0).unwrap(), 1.0);
}

/// The same scenario end to end: the cached span carries the sample
#[test]
fn test_cached_aggregate_span_answers_query() {
    let mut points: Vec<TimedValue> = (0..100).map(|i| TimedValue::new(i * 10, 1.0)).collect();
    points[45] = TimedValue::new(450, 7.0);

    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, points.clone()));
    let cache = Arc::new(CacheManager::new());
    cache.add_to_cache(Arc::new(AggregateSpan::from_points(0, iv(0, 1000), 40, &points).into()));
    let exec = executor_without_prefetch(&source, &cache);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(0.9)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    let m = results.measure(0).unwrap();
    assert!(m.points.contains(&TimedValue::new(450, 7.0)));
    assert_eq!(m.summary.max, Some(7.0));
    assert_eq!(m.summary.min, Some(1.0));
    assert_eq!(results.cached_spans, 1);
}

/// Spans coarser than half a pixel column are ignored
#[test]
fn test_coarse_span_is_not_used() {
    let points = series(100, 10);
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, points.clone()));
    let cache = Arc::new(CacheManager::new());
    cache.add_to_cache(Arc::new(AggregateSpan::from_points(0, iv(0, 1000), 60, &points).into()));
    let exec = executor_without_prefetch(&source, &cache);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();
    assert_eq!(results.cached_spans, 0);
    assert!(results.io_points > 0);
    assert_eq!(cache.stats().spans_rejected, 1);
}

// ============================================================================
// ERROR-DRIVEN FETCHING
// ============================================================================

/// Cold queries fetch and the reported flag follows the tolerance
#[test]
fn test_cold_query_fetches_before_responding() {
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(100, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = executor_without_prefetch(&source, &cache);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(0.9)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    let stats = source.stats();
    assert_eq!(stats.raw_requests + stats.aggregate_requests, 1);
    assert!(results.io_points > 0);
    for m in &results.measures {
        assert_eq!(m.has_error, query.exceeds_tolerance(m.error));
    }
    assert!(!results.has_error());
}

/// A total-mode error of exactly `1 - accuracy` is accepted without fetching
#[test]
fn test_error_at_tolerance_needs_no_fetch() {
    let points = vec![
        TimedValue::new(0, 0.0),
        TimedValue::new(40, 4.0),
        TimedValue::new(52, 6.0),
        TimedValue::new(99, 10.0),
    ];
    let source = Arc::new(InMemoryDataSource::new(1).with_measure(0, points.clone()));
    let cache = Arc::new(CacheManager::new());
    cache.add_to_cache(Arc::new(RawSpan::new(0, iv(0, 100), points.clone()).into()));
    // One bin straddling the column boundary adds a single uncertain row
    cache.add_to_cache(Arc::new(AggregateSpan::from_points(0, iv(45, 55), 10, &points).into()));
    let exec = QueryExecutor::with_config(
        Arc::clone(&source),
        Arc::clone(&cache),
        ExecutorConfig::default().without_exact_fallback(),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    );

    let query = QueryBuilder::new()
        .range(0, 100)
        .measure(0)
        .viewport(2, 5)
        .accuracy(0.9)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    let m = results.measure(0).unwrap();
    assert_eq!(m.error, 0.1);
    assert!(!m.has_error);
    assert_eq!(m.resolution, Resolution::Bounded);
    assert_eq!(results.io_points, 0);
    assert_eq!(results.fetch_kind, None);
    let stats = source.stats();
    assert_eq!(stats.raw_requests + stats.aggregate_requests, 0);
}

/// Overlapping raw and aggregate spans never count a sample twice
#[test]
fn test_overlapping_cached_spans_count_each_sample_once() {
    let points: Vec<TimedValue> = (0..100).map(|i| TimedValue::new(i * 10, i as f64)).collect();
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, points.clone()));
    let cache = Arc::new(CacheManager::new());
    let raw: Vec<TimedValue> = points.iter().copied().filter(|p| p.timestamp < 450).collect();
    cache.add_to_cache(Arc::new(RawSpan::new(0, iv(0, 450), raw).into()));
    cache.add_to_cache(Arc::new(AggregateSpan::from_points(0, iv(0, 1000), 40, &points).into()));
    let exec = executor_without_prefetch(&source, &cache);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(0.0)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    // Column [400, 500) cannot use bin [440, 480) and is fetched instead
    assert_eq!(results.fetch_kind, Some(FetchKind::Raw));
    assert_eq!(results.io_points, 10);

    // Samples inside bins straddling 500, 700 and 900 are the only ones left out
    let skipped = [50.0, 51.0, 68.0, 69.0, 70.0, 71.0, 88.0, 89.0, 90.0, 91.0];
    let summary = &results.measure(0).unwrap().summary;
    assert_eq!(summary.count, 90);
    assert_eq!(summary.sum, 4950.0 - skipped.iter().sum::<f64>());
    assert_eq!(summary.min, Some(0.0));
    assert_eq!(summary.max, Some(99.0));
}

/// Only the uncovered part of the range is requested
#[test]
fn test_partial_cache_fetches_only_missing_range() {
    let points = series(100, 10);
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, points.clone()));
    let cache = Arc::new(CacheManager::new());
    let cached: Vec<TimedValue> = points.iter().copied().filter(|p| p.timestamp < 500).collect();
    cache.add_to_cache(Arc::new(RawSpan::new(0, iv(0, 500), cached).into()));
    let exec = executor_without_prefetch(&source, &cache);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(0.9)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    assert_eq!(results.fetch_kind, Some(FetchKind::Raw));
    assert_eq!(results.io_points, 50);
    assert_eq!(source.stats().raw_rows, 50);
    assert_eq!(results.measure(0).unwrap().summary.count, 100);
    assert_eq!(cache.len(), 2);
}

/// Misaligned aggregated bins leave residual error that the fallback removes
#[test]
fn test_exact_fallback_reports_empty_columns() {
    // Ramp with a hole over column 5
    let points: Vec<TimedValue> = (0..1000)
        .filter(|t| !(500..600).contains(t))
        .map(|t| TimedValue::new(t, t as f64))
        .collect();
    let source = Arc::new(InMemoryDataSource::new(1).with_measure(0, points));
    let cache = Arc::new(CacheManager::new());
    let exec = QueryExecutor::with_config(
        Arc::clone(&source),
        Arc::clone(&cache),
        ExecutorConfig::new()
            .with_initial_aggregation_factor(3.0)
            .with_max_aggregation_factor(3.0),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    );

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(1.0)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    assert_eq!(results.fetch_kind, Some(FetchKind::Aggregate));
    assert!(results.timings.fallback.is_some());
    let m = results.measure(0).unwrap();
    assert_eq!(m.resolution, Resolution::Exact { empty_columns: vec![5] });
    assert_eq!(m.error, 0.0);
    assert!(!m.has_error);
    assert!(m.points.iter().all(|p| !(500..600).contains(&p.timestamp)));
    assert_eq!(exec.stats().exact_fallbacks, 1);
}

/// With the fallback disabled the residual error is reported instead
#[test]
fn test_bounded_error_without_fallback() {
    let points: Vec<TimedValue> = (0..1000).map(|t| TimedValue::new(t, t as f64)).collect();
    let source = Arc::new(InMemoryDataSource::new(1).with_measure(0, points));
    let cache = Arc::new(CacheManager::new());
    let exec = QueryExecutor::with_config(
        Arc::clone(&source),
        Arc::clone(&cache),
        ExecutorConfig::new()
            .with_initial_aggregation_factor(3.0)
            .with_max_aggregation_factor(3.0)
            .without_exact_fallback(),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    );

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .accuracy(1.0)
        .build()
        .unwrap();
    let results = exec.execute(&query).unwrap();

    let m = results.measure(0).unwrap();
    assert_eq!(m.resolution, Resolution::Bounded);
    assert!(m.error > 0.0);
    assert!(m.has_error);
    assert!(results.timings.fallback.is_none());
}

// ============================================================================
// PREFETCH
// ============================================================================

/// Answered queries warm the neighbouring ranges
#[test]
fn test_prefetch_warms_neighbours() {
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(300, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = QueryExecutor::new(Arc::clone(&source), Arc::clone(&cache));

    let first = QueryBuilder::new()
        .range(1000, 2000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    exec.execute(&first).unwrap();
    assert_eq!(exec.prefetch_stats().runs, 1);
    assert!(!cache.get_from_cache(&iv(500, 1000), &[0], 100.0).is_empty());
    assert!(!cache.get_from_cache(&iv(2000, 2500), &[0], 100.0).is_empty());

    // Panning left stays inside warmed data
    let panned = QueryBuilder::new()
        .range(500, 1500)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    let results = exec.execute(&panned).unwrap();
    assert_eq!(results.io_points, 0);
    assert!(!results.has_error());
}

// ============================================================================
// FAILURES
// ============================================================================

/// Source failures during the fetch round fail the query
#[test]
fn test_source_failure_propagates() {
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(100, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = executor_without_prefetch(&source, &cache);
    source.set_failing(true);

    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    let err = exec.execute(&query).unwrap_err();
    assert!(matches!(err, Error::Source(SourceError::Unavailable(_))));
    assert!(cache.is_empty());
    assert_eq!(exec.stats().failed, 1);
    assert_eq!(exec.stats().queries, 0);
}

/// Prefetch failures are swallowed once the answer is complete
#[test]
fn test_prefetch_failure_does_not_fail_query() {
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(300, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = QueryExecutor::new(Arc::clone(&source), Arc::clone(&cache));

    let warm = QueryBuilder::new()
        .range(1000, 2000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    exec.execute(&warm).unwrap();

    source.set_failing(true);
    let cached = QueryBuilder::new()
        .range(2000, 2500)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    let results = exec.execute(&cached).unwrap();
    assert_eq!(results.io_points, 0);
    assert_eq!(exec.prefetch_stats().failures, 1);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

/// Many threads share one executor and one cache
#[test]
fn test_concurrent_queries() {
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(1000, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = Arc::new(QueryExecutor::new(Arc::clone(&source), Arc::clone(&cache)));

    let mut handles = vec![];
    for thread_id in 0..8i64 {
        let exec = Arc::clone(&exec);
        handles.push(thread::spawn(move || {
            for round in 0..5i64 {
                let from = ((thread_id + round) % 9) * 1000;
                let query = QueryBuilder::new()
                    .range(from, from + 1000)
                    .measure(0)
                    .viewport(10, 100)
                    .build()
                    .unwrap();
                let results = exec.execute(&query).expect("Query failed");
                assert!(!results.has_error());
                assert_eq!(results.measure(0).unwrap().summary.count, 100);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(exec.stats().queries, 40);
    assert!(!cache.is_empty());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Executor settings can come from a TOML file
#[test]
fn test_executor_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vizcache.toml");
    std::fs::write(
        &path,
        r#"
        [query]
        exact_fallback = false

        [prefetch]
        enabled = false
        "#,
    )
    .unwrap();
    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    config.validate().unwrap();

    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, series(300, 10)));
    let cache = Arc::new(CacheManager::new());
    let exec = QueryExecutor::with_config(
        Arc::clone(&source),
        Arc::clone(&cache),
        config.executor_config(),
        config.processor_config(),
        config.prefetch_config(),
    );

    let query = QueryBuilder::new()
        .range(1000, 2000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();
    exec.execute(&query).unwrap();
    assert_eq!(exec.prefetch_stats().runs, 0);
    assert_eq!(exec.prefetch_stats().skipped, 1);
    assert_eq!(cache.len(), 1);
}

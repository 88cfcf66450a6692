//! Query Benchmarks
//!
//! Cold versus warm query latency, span folding throughput and error
//! evaluation cost for growing viewport widths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_vizcache::cache::span::{AggregateSpan, RawSpan};
use kuba_vizcache::cache::CacheManager;
use kuba_vizcache::query::{
    ErrorCalculator, ErrorMode, ExecutorConfig, PixelColumns, PrefetchConfig, ProcessorConfig,
    QueryBuilder, QueryExecutor,
};
use kuba_vizcache::source::InMemoryDataSource;
use kuba_vizcache::types::{TimeInterval, TimedValue};
use std::hint::black_box;
use std::sync::Arc;

// =============================================================================
// Test Data Generators
// =============================================================================

/// One sample per millisecond over `[0, count)`
fn create_points(count: i64) -> Vec<TimedValue> {
    (0..count)
        .map(|t| TimedValue::new(t, 100.0 + (t as f64 * 0.01).sin() * 10.0))
        .collect()
}

fn interval(to: i64) -> TimeInterval {
    TimeInterval::new_unchecked(0, to)
}

fn executor(points: Vec<TimedValue>) -> QueryExecutor<InMemoryDataSource> {
    let source = Arc::new(InMemoryDataSource::new(1).with_measure(0, points));
    QueryExecutor::with_config(
        source,
        Arc::new(CacheManager::new()),
        ExecutorConfig::default(),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    )
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_cold_vs_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let points = create_points(100_000);
    let query = QueryBuilder::new()
        .range(0, 100_000)
        .measure(0)
        .viewport(1_000, 400)
        .build()
        .expect("valid query");

    group.bench_function("cold", |b| {
        b.iter_batched(
            || executor(points.clone()),
            |exec| black_box(exec.execute(&query).expect("query failed")),
            criterion::BatchSize::LargeInput,
        )
    });

    let warm = executor(points.clone());
    warm.execute(&query).expect("query failed");
    group.bench_function("warm", |b| {
        b.iter(|| black_box(warm.execute(&query).expect("query failed")))
    });

    group.finish();
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold");
    let points = create_points(100_000);

    for width in [100u32, 1_000, 4_000] {
        let raw = RawSpan::new(0, interval(100_000), points.clone());
        group.throughput(Throughput::Elements(points.len() as u64));
        group.bench_with_input(BenchmarkId::new("raw_span", width), &width, |b, &width| {
            b.iter(|| {
                let mut columns = PixelColumns::new(interval(100_000), width, &[0]);
                columns.fold_raw_span(&raw).expect("fold failed");
                black_box(columns)
            })
        });

        let bin_width = (100_000 / (width as i64 * 4)).max(1);
        let agg = AggregateSpan::from_points(0, interval(100_000), bin_width, &points);
        group.throughput(Throughput::Elements(agg.size() as u64));
        group.bench_with_input(BenchmarkId::new("aggregate_span", width), &width, |b, &width| {
            b.iter(|| {
                let mut columns = PixelColumns::new(interval(100_000), width, &[0]);
                columns.fold_aggregate_span(&agg).expect("fold failed");
                black_box(columns)
            })
        });
    }

    group.finish();
}

fn bench_error_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("error");
    let points = create_points(100_000);

    for width in [100u32, 1_000, 4_000] {
        let agg = AggregateSpan::from_points(0, interval(100_000), 7, &points);
        let mut columns = PixelColumns::new(interval(100_000), width, &[0]);
        columns.fold_aggregate_span(&agg).expect("fold failed");
        let calculator = ErrorCalculator::new(400, 0.95);

        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("total", width), &columns, |b, columns| {
            b.iter(|| black_box(calculator.calculate(columns, ErrorMode::Total).expect("evaluation failed")))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cold_vs_warm, bench_fold, bench_error_evaluation);
criterion_main!(benches);

//! Tests for the metrics switch of the monitoring configuration
//!
//! Kept in its own test binary: the switch is process-wide, so toggling it
//! next to other tests would change what they record.

use kuba_vizcache::cache::CacheManager;
use kuba_vizcache::config::Config;
use kuba_vizcache::metrics;
use kuba_vizcache::query::{
    ExecutorConfig, PrefetchConfig, ProcessorConfig, QueryBuilder, QueryExecutor,
};
use kuba_vizcache::source::InMemoryDataSource;
use kuba_vizcache::types::TimedValue;
use std::sync::Arc;

fn answered_queries() -> f64 {
    metrics::QUERIES_TOTAL.with_label_values(&["ok"]).get()
}

#[test]
fn test_metrics_follow_monitoring_config() {
    let points: Vec<TimedValue> = (0..100).map(|i| TimedValue::new(i * 10, i as f64)).collect();
    let source = Arc::new(InMemoryDataSource::new(10).with_measure(0, points));
    let exec = QueryExecutor::with_config(
        source,
        Arc::new(CacheManager::new()),
        ExecutorConfig::default(),
        ProcessorConfig::default(),
        PrefetchConfig::default().disabled(),
    );
    let query = QueryBuilder::new()
        .range(0, 1000)
        .measure(0)
        .viewport(10, 100)
        .build()
        .unwrap();

    // Disabled: neither direct calls nor queries touch the registry
    let mut config = Config::default();
    config.monitoring.metrics_enabled = false;
    metrics::configure(&config.monitoring);
    assert!(!metrics::is_enabled());

    let fallbacks = metrics::EXACT_FALLBACKS_TOTAL.get();
    let queries = answered_queries();
    metrics::record_exact_fallback();
    exec.execute(&query).unwrap();
    assert_eq!(metrics::EXACT_FALLBACKS_TOTAL.get(), fallbacks);
    assert_eq!(answered_queries(), queries);
    assert_eq!(exec.stats().queries, 1);

    // Enabled again: recording resumes
    config.monitoring.metrics_enabled = true;
    metrics::configure(&config.monitoring);
    assert!(metrics::is_enabled());

    metrics::record_exact_fallback();
    exec.execute(&query).unwrap();
    assert_eq!(metrics::EXACT_FALLBACKS_TOTAL.get(), fallbacks + 1.0);
    assert_eq!(answered_queries(), queries + 1.0);

    let text = metrics::gather_metrics().expect("Failed to gather metrics");
    assert!(text.contains("vizcache_queries_total"));
}

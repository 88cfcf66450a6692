//! Configuration management for the visualization cache
//!
//! TOML configuration with environment variable overrides and defaults.
//! Query heuristics are turned into explicit [`ExecutorConfig`],
//! [`ProcessorConfig`] and [`PrefetchConfig`] values handed to the executor.

use crate::error::{Error, Result};
use crate::query::executor::ExecutorConfig;
use crate::query::prefetch::PrefetchConfig;
use crate::query::processor::ProcessorConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query execution heuristics
    #[serde(default)]
    pub query: QueryConfig,

    /// Speculative prefetching
    #[serde(default)]
    pub prefetch: PrefetchSettings,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Aggregation factor used when no aggregate span informs the estimate
    #[serde(default = "default_initial_aggregation_factor")]
    pub initial_aggregation_factor: f64,

    /// Upper bound for the aggregation factor after doubling
    #[serde(default = "default_max_aggregation_factor")]
    pub max_aggregation_factor: f64,

    /// Raw points tolerated per aggregated value before fetching bins
    #[serde(default = "default_data_reduction_ratio")]
    pub data_reduction_ratio: f64,

    /// Run a per-column exact fetch when bounded errors remain
    #[serde(default = "default_true")]
    pub exact_fallback: bool,
}

/// Prefetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrefetchSettings {
    /// Warm the cache around answered queries
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extension in viewport widths, split over both sides
    #[serde(default = "default_prefetch_factor")]
    pub factor: f64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Record Prometheus metrics, applied by `metrics::configure`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level or filter directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-like structured fields with targets and thread ids
    #[serde(default = "default_true")]
    pub structured_logging: bool,
}

// Default value functions
fn default_initial_aggregation_factor() -> f64 { 4.0 }
fn default_max_aggregation_factor() -> f64 { 64.0 }
fn default_data_reduction_ratio() -> f64 { 6.0 }
fn default_prefetch_factor() -> f64 { 1.0 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            initial_aggregation_factor: default_initial_aggregation_factor(),
            max_aggregation_factor: default_max_aggregation_factor(),
            data_reduction_ratio: default_data_reduction_ratio(),
            exact_fallback: true,
        }
    }
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: default_prefetch_factor(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: true,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Query
        if let Some(v) = env_parse("VIZCACHE_INITIAL_AGGREGATION_FACTOR") {
            self.query.initial_aggregation_factor = v;
        }
        if let Some(v) = env_parse("VIZCACHE_MAX_AGGREGATION_FACTOR") {
            self.query.max_aggregation_factor = v;
        }
        if let Some(v) = env_parse("VIZCACHE_DATA_REDUCTION_RATIO") {
            self.query.data_reduction_ratio = v;
        }
        if let Some(v) = env_parse("VIZCACHE_EXACT_FALLBACK") {
            self.query.exact_fallback = v;
        }

        // Prefetch
        if let Some(v) = env_parse("VIZCACHE_PREFETCH_ENABLED") {
            self.prefetch.enabled = v;
        }
        if let Some(v) = env_parse("VIZCACHE_PREFETCH_FACTOR") {
            self.prefetch.factor = v;
        }

        // Monitoring
        if let Some(v) = env_parse("VIZCACHE_METRICS_ENABLED") {
            self.monitoring.metrics_enabled = v;
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let query = &self.query;
        if !(query.initial_aggregation_factor >= 1.0) {
            return Err(Error::Configuration(
                "Initial aggregation factor must be >= 1".to_string(),
            ));
        }
        if !(query.max_aggregation_factor >= query.initial_aggregation_factor) {
            return Err(Error::Configuration(
                "Max aggregation factor must be >= initial aggregation factor".to_string(),
            ));
        }
        if !(query.data_reduction_ratio > 0.0) {
            return Err(Error::Configuration(
                "Data reduction ratio must be > 0".to_string(),
            ));
        }
        if !(self.prefetch.factor >= 0.0) || !self.prefetch.factor.is_finite() {
            return Err(Error::Configuration(
                "Prefetch factor must be a finite value >= 0".to_string(),
            ));
        }
        if self.monitoring.log_level.trim().is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path, e))
        })
    }

    /// Executor settings
    pub fn executor_config(&self) -> ExecutorConfig {
        let config = ExecutorConfig::new()
            .with_initial_aggregation_factor(self.query.initial_aggregation_factor)
            .with_max_aggregation_factor(self.query.max_aggregation_factor);
        if self.query.exact_fallback {
            config
        } else {
            config.without_exact_fallback()
        }
    }

    /// Raw/aggregate decision settings
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::new().with_data_reduction_ratio(self.query.data_reduction_ratio)
    }

    /// Prefetch settings
    pub fn prefetch_config(&self) -> PrefetchConfig {
        let config = PrefetchConfig::new().with_factor(self.prefetch.factor);
        if self.prefetch.enabled {
            config
        } else {
            config.disabled()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

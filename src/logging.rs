//! Tracing subscriber setup
//!
//! `RUST_LOG` takes priority over the configured level. Installing twice is
//! harmless: the second call reports that a subscriber already exists.

use crate::config::MonitoringConfig;
use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber for the process
///
/// Returns `Ok(false)` when a global subscriber was already set.
pub fn init_logging(config: &MonitoringConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::Configuration(format!("Invalid log level {}: {}", config.log_level, e))
        })?,
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.structured_logging)
        .with_thread_ids(config.structured_logging)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            level = %config.log_level,
            "Logging initialized"
        );
    }
    Ok(installed)
}

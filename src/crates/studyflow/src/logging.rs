//! Logging setup
//!
//! Filter priority (highest first):
//! 1. `RUST_LOG`
//! 2. the `--log-level` override
//! 3. `logging.level` from configuration
//!
//! Logs go to stderr so command output on stdout stays clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingSettings;
use crate::error::{Result, StudyflowError};

/// Install the global subscriber.
pub fn init(settings: &LoggingSettings, level_override: Option<&str>) -> Result<()> {
    let filter = build_filter(settings, level_override)?;
    let registry = Registry::default().with(filter);

    let installed = if settings.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| StudyflowError::config(format!("Failed to install logger: {}", e)))
}

fn build_filter(settings: &LoggingSettings, level_override: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = level_override.unwrap_or(&settings.level);
    EnvFilter::try_new(level)
        .map_err(|e| StudyflowError::config(format!("Invalid log directive {:?}: {}", level, e)))
}

//! # Structured Logging
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`]. `RUST_LOG`
//! directives are honoured on top of the configured level.

use crate::core::config::LoggingConfig;
use crate::core::error::{CacheError, CacheResult};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(format: &str) -> CacheResult<Self> {
        match format.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(CacheError::config(format!("Unknown log format '{}'", other))),
        }
    }
}

/// Parse a level name
pub fn parse_level(level: &str) -> CacheResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(CacheError::config(format!("Unknown log level '{}'", other))),
    }
}

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber was already installed, which is not
/// an error: host applications usually set up their own.
pub fn init_logging(config: &LoggingConfig) -> CacheResult<bool> {
    let level = parse_level(&config.level)?;
    let format = LogFormat::parse(&config.format)?;

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %level, ?format, "Logging initialized");
    } else {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
    Ok(installed)
}

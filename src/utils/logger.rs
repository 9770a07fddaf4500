use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid logging.level '{0}'. Valid values: trace, debug, info, warn, error")]
    InvalidLevel(String),

    #[error("a global tracing subscriber is already installed")]
    SubscriberInstalled(#[from] SetGlobalDefaultError),
}

/// Parse level string -> LevelFilter
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Installs the global subscriber described by `logging_config` and routes
/// `log` records (reqwest, hyper) through it. Can only succeed once per
/// process. A `log` logger installed by someone else only costs the bridge.
pub fn init_logging(logging_config: &LoggingConfig) -> Result<(), LoggingError> {
    let level_filter = parse_level(&logging_config.level)?;

    // RUST_LOG style directives can't be mixed in here; the configured level wins.
    let filter_layer = EnvFilter::default().add_directive(level_filter.into());

    match logging_config.format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt::layer().json().flatten_event(true));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Console => {
            let subscriber = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt::layer().pretty());
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        warn!("`log` records will not reach tracing: {}", e);
    }
    Ok(())
}

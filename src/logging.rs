//! Logging initialisation.
//!
//! Logs go to stderr so stdout stays free for device output. `SHELLTAP_LOG`
//! overrides the filter with the usual `EnvFilter` syntax, e.g.
//! `SHELLTAP_LOG=shelltap::discovery=trace`.

use crate::config::LogConfig;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "SHELLTAP_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Level after applying `-v` flags on top of the configured one.
pub fn effective_level(config: &LogConfig, verbosity: u8) -> Level {
    match verbosity {
        0 => parse_level(&config.level),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_logging(config: &LogConfig, verbosity: u8) {
    let level = effective_level(config, verbosity);
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("shelltap={}", level.as_str().to_lowercase())));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match LogFormat::parse(&config.format) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(%level, format = %config.format, "logging initialized");
    }
}

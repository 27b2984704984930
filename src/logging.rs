//! Structured logging setup
//!
//! Logs go to stderr so that reports printed on stdout stay machine-readable.

use crate::error::RelayError;
use std::env;
use std::io;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Base filter directive (`RUST_LOG` syntax)
    pub level: String,
    pub format: LogFormat,
    /// Include source file and line numbers
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG`, `LOG_FORMAT` and `LOG_INCLUDE_LOCATION`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("RUST_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "info".into()),
            format: LogFormat::parse(lookup("LOG_FORMAT").as_deref()),
            include_location: lookup("LOG_INCLUDE_LOCATION").is_some(),
        }
    }

    /// Raise the base level to `debug` unless a filter was configured
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose && self.level == "info" {
            self.level = "debug".into();
        }
        self
    }

    /// Filter built from the configured level with HTTP client noise capped at `warn`
    pub fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));
        ["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"]
            .iter()
            .filter_map(|d| d.parse().ok())
            .fold(base, EnvFilter::add_directive)
    }

    /// Install the global tracing subscriber.
    ///
    /// Fails if a subscriber is already installed.
    pub fn init(&self) -> Result<(), RelayError> {
        let registry = tracing_subscriber::registry().with(self.filter());

        let result = match self.format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_file(self.include_location)
                        .with_line_number(self.include_location)
                        .with_target(true)
                        .with_writer(io::stderr),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_file(self.include_location)
                        .with_line_number(self.include_location)
                        .with_target(true)
                        .with_writer(io::stderr),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(io::stderr),
                )
                .try_init(),
        };
        result.map_err(|e| RelayError::Logging(e.to_string()))?;

        debug!(level = %self.level, format = ?self.format, "Logging initialized");
        Ok(())
    }
}

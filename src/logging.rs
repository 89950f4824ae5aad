//! Tracing subscriber setup for the `vmforge` binary.
//!
//! `RUST_LOG` selects the filter (falling back to the caller's default) and
//! `VMFORGE_LOG_FORMAT` selects `json`, `compact`, or `pretty` output. Logs go
//! to stderr so stdout stays reserved for JSON results.

use std::env;
use std::io;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "VMFORGE_LOG_FORMAT";

/// Output format of the subscriber.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Single-line human readable output.
    #[default]
    Compact,
    /// Multi-line human readable output.
    Pretty,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to compact.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }

    fn from_env() -> Self {
        env::var(LOG_FORMAT_ENV).map_or_else(|_| Self::default(), |raw| Self::parse(&raw))
    }
}

/// Raised when a global subscriber is already installed.
#[derive(Debug, Error)]
#[error("failed to initialise tracing: {0}")]
pub struct LoggingError(String);

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when a subscriber was already installed.
pub fn init(default_filter: &str) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(fmt::layer().with_ansi(false).json().with_writer(io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(io::stderr))
            .try_init(),
    };
    installed.map_err(|err| LoggingError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case(" PRETTY ", LogFormat::Pretty)]
    #[case("compact", LogFormat::Compact)]
    #[case("fancy", LogFormat::Compact)]
    fn parses_format_names(#[case] raw: &str, #[case] expected: LogFormat) {
        assert_eq!(LogFormat::parse(raw), expected);
    }
}

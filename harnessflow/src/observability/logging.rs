//! Logging initialization.
//!
//! Configures `tracing-subscriber` from the `[settings]` log level and
//! format. `RUST_LOG`, when set, takes precedence over the configured level.
//! Logs go to stderr; stdout is reserved for the run report.

use crate::errors::HarnessError;
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    #[default]
    Pretty,
    /// Single-line human-readable output.
    Compact,
    /// JSON lines.
    Json,
}

impl FromStr for LogFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(HarnessError::Usage(format!(
                "unknown log format '{other}', expected 'pretty', 'compact' or 'json'"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Must be called at most once per process.
///
/// # Errors
///
/// Returns [`HarnessError::Internal`] if a global subscriber is already set.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<(), HarnessError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Json => registry.with(layer.json()).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
    };
    result.map_err(|e| HarnessError::Internal(format!("failed to initialize {format} tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_unknown_log_format_is_usage_error() {
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert_eq!(err.exit_code(), crate::errors::exit_codes::USAGE);
    }

    #[test]
    fn test_init_tracing_only_once() {
        let _ = init_tracing("debug", LogFormat::Compact);
        assert!(init_tracing("info", LogFormat::Json).is_err());
    }
}

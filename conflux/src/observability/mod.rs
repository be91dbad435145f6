//! Logging setup.
//!
//! Every component logs through `tracing`; nothing here is required for
//! that. These helpers install a `tracing-subscriber` pipeline for binaries
//! and tests that do not bring their own.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::ENV_PREFIX;
use crate::errors::ConfigError;

/// Directive used when neither `CONFLUX_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::Env {
                key: format!("{ENV_PREFIX}LOG_FORMAT"),
                value: s.to_string(),
            }),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(format!("{ENV_PREFIX}LOG"))
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs a global subscriber writing in `format`.
///
/// Filtering follows `CONFLUX_LOG`, then `RUST_LOG`, then `info`. Returns
/// false if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
    };
    installed.is_ok()
}

/// Installs a subscriber using `CONFLUX_LOG_FORMAT` (default pretty).
pub fn init_from_env() -> Result<bool, ConfigError> {
    let format = match std::env::var(format!("{ENV_PREFIX}LOG_FORMAT")) {
        Ok(raw) => raw.parse()?,
        Err(_) => LogFormat::default(),
    };
    Ok(init_tracing(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(ConfigError::Env { value, .. }) if value == "xml"
        ));
    }

    #[test]
    fn test_init_after_existing_subscriber_is_rejected() {
        crate::testing::init_test_tracing();
        assert!(!init_tracing(LogFormat::Json));
        assert!(!init_tracing(LogFormat::Pretty));
    }
}

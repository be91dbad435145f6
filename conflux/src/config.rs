//! Toolkit-wide configuration.
//!
//! Every component can also be configured directly through its builder; this
//! struct exists so a process can load one set of defaults (from a file or the
//! environment) and hand it to every constructor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "CONFLUX_";

/// Configuration shared by the pool, orchestrators, multiplexer and cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Maximum number of tasks the shared worker pool runs at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-invocation worker bound for fan-out orchestration.
    #[serde(default = "default_fanout_max_workers")]
    pub fanout_max_workers: usize,
    /// Per-task timeout for fan-out orchestration, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub fanout_timeout_seconds: f64,
    /// Per-task timeout for the second pipeline stage, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub stage_timeout_seconds: f64,
    /// Number of `StageFinished` markers a fan-out appends to its queue.
    #[serde(default = "default_drain_stages")]
    pub drain_stages: usize,
    /// How often the multiplexer checks its workers when the queue is idle.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    /// Capacity of the default in-memory cache store.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Number of latency samples kept by cache metrics.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
    /// Whether memoization is enabled.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_pool_size() -> usize {
    256
}

fn default_fanout_max_workers() -> usize {
    32
}

fn default_timeout_seconds() -> f64 {
    60.0
}

fn default_drain_stages() -> usize {
    2
}

fn default_watchdog_interval_ms() -> u64 {
    250
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_metrics_window() -> usize {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            fanout_max_workers: default_fanout_max_workers(),
            fanout_timeout_seconds: default_timeout_seconds(),
            stage_timeout_seconds: default_timeout_seconds(),
            drain_stages: default_drain_stages(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            cache_capacity: default_cache_capacity(),
            metrics_window: default_metrics_window(),
            cache_enabled: default_true(),
        }
    }
}

impl ToolkitConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults and applies `CONFLUX_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies overrides from a lookup function keyed by upper-case field name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("POOL_SIZE") {
            self.pool_size = parse_var("POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("FANOUT_MAX_WORKERS") {
            self.fanout_max_workers = parse_var("FANOUT_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("FANOUT_TIMEOUT_SECONDS") {
            self.fanout_timeout_seconds = parse_var("FANOUT_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("STAGE_TIMEOUT_SECONDS") {
            self.stage_timeout_seconds = parse_var("STAGE_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("DRAIN_STAGES") {
            self.drain_stages = parse_var("DRAIN_STAGES", &v)?;
        }
        if let Some(v) = lookup("WATCHDOG_INTERVAL_MS") {
            self.watchdog_interval_ms = parse_var("WATCHDOG_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("CACHE_CAPACITY") {
            self.cache_capacity = parse_var("CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("METRICS_WINDOW") {
            self.metrics_window = parse_var("METRICS_WINDOW", &v)?;
        }
        if let Some(v) = lookup("CACHE_ENABLED") {
            self.cache_enabled = parse_var("CACHE_ENABLED", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects zero-sized pools and containers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0
            || self.fanout_max_workers == 0
            || self.cache_capacity == 0
            || self.metrics_window == 0
        {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the fan-out worker bound.
    #[must_use]
    pub fn with_fanout_max_workers(mut self, workers: usize) -> Self {
        self.fanout_max_workers = workers;
        self
    }

    /// Sets the fan-out timeout.
    #[must_use]
    pub fn with_fanout_timeout(mut self, seconds: f64) -> Self {
        self.fanout_timeout_seconds = seconds;
        self
    }

    /// Sets the number of drain stages.
    #[must_use]
    pub fn with_drain_stages(mut self, stages: usize) -> Self {
        self.drain_stages = stages;
        self
    }

    /// Enables or disables memoization.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Gets the fan-out timeout as a Duration.
    #[must_use]
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fanout_timeout_seconds)
    }

    /// Gets the second-stage timeout as a Duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stage_timeout_seconds)
    }

    /// Gets the watchdog interval as a Duration.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ToolkitConfig::default();
        assert_eq!(config.pool_size, 256);
        assert_eq!(config.fanout_max_workers, 32);
        assert_eq!(config.fanout_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_stages, 2);
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ToolkitConfig =
            serde_json::from_str(r#"{"pool_size": 8, "cache_enabled": false}"#).unwrap();
        assert_eq!(config.pool_size, 8);
        assert!(!config.cache_enabled);
        assert_eq!(config.fanout_max_workers, 32);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> =
            [("POOL_SIZE", "16"), ("DRAIN_STAGES", "1"), ("CACHE_ENABLED", "false")]
                .into_iter()
                .collect();

        let config = ToolkitConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.pool_size, 16);
        assert_eq!(config.drain_stages, 1);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_override_parse_error() {
        let err = ToolkitConfig::default()
            .with_overrides(|k| (k == "POOL_SIZE").then(|| "many".to_string()))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Env {
                key: "CONFLUX_POOL_SIZE".into(),
                value: "many".into()
            }
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ToolkitConfig::default()
            .with_overrides(|k| (k == "CACHE_CAPACITY").then(|| "0".to_string()))
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidCapacity);
    }
}

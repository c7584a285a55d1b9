///
/// # Runtime Configuration
///
/// Parses `tether.toml`. Every section and key is optional; missing
/// values fall back to the defaults below.
///
/// ## Example tether.toml
///
/// ```toml
/// [executor]
/// thread_name = "tether-owner"
///
/// [timers]
/// thread_name = "tether-timers"
/// max_poll_ms = 50
///
/// [logging]
/// level = "info"
/// ```
///
/// `validate` rejects empty thread names, a zero poll interval and log
/// levels that `tracing` does not know.
///

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tether_threads::{DEFAULT_THREAD_NAME, ExecutorConfig};
use tether_timers::{DEFAULT_MAX_POLL, DEFAULT_TIMER_THREAD_NAME, TimerConfig};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub executor: ExecutorSection,
    pub timers: TimersSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub thread_name: String,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimersSection {
    pub thread_name: String,
    pub max_poll_ms: u64,
}

impl Default for TimersSection {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_TIMER_THREAD_NAME.to_string(),
            max_poll_ms: DEFAULT_MAX_POLL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(self.level.trim()).map_err(|_| {
            ConfigError::Invalid(format!("unknown log level '{}'", self.level))
        })
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "executor.thread_name must not be empty".to_string(),
            ));
        }
        if self.timers.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "timers.thread_name must not be empty".to_string(),
            ));
        }
        if self.timers.max_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "timers.max_poll_ms must be greater than zero".to_string(),
            ));
        }
        self.logging.level()?;
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(self.executor.thread_name.clone())
    }

    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            thread_name: self.timers.thread_name.clone(),
            max_poll: Duration::from_millis(self.timers.max_poll_ms),
        }
    }
}

///
/// Runtime error types.
///
/// Configuration problems surface as `ConfigError`; anything that goes
/// wrong while bringing the threads up is wrapped in `RuntimeError`.
///

use std::path::PathBuf;
use thiserror::Error;

use tether_core::DispatchError;
use tether_timers::TimerError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Owner thread: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Timer thread: {0}")]
    Timer(#[from] TimerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid("executor.thread_name is empty".to_string());
        assert_eq!(err.to_string(), "Invalid config: executor.thread_name is empty");

        let wrapped: RuntimeError = err.into();
        assert_eq!(
            wrapped.to_string(),
            "Invalid config: executor.thread_name is empty"
        );
    }

    #[test]
    fn test_dispatch_error_wraps() {
        let err: RuntimeError = DispatchError::Spawn("no threads".to_string()).into();
        assert!(matches!(err, RuntimeError::Dispatch(DispatchError::Spawn(_))));
    }
}

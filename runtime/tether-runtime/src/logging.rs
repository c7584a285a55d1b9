//!
//! Log subscriber bootstrap. Output goes to stderr without ANSI colours.
//!

use crate::config::LoggingConfig;
use crate::errors::ConfigError;

/// Install the global fmt subscriber. Returns `Ok(false)` when another
/// subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let level = config.level()?;
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .with_thread_names(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init(&config).unwrap();
        assert!(!init(&config).unwrap());
    }

    #[test]
    fn test_init_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
        };
        assert!(init(&config).is_err());
    }
}

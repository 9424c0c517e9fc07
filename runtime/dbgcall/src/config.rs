//! Injector configuration
//!
//! Loaded from TOML; every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! [retry]
//! max-attempts = 100
//! backoff-us = 100
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of signals sent before giving up on transient states
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Default pause between attempts, in microseconds
pub const DEFAULT_BACKOFF_US: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("retry.max-attempts must be at least 1")]
    NoAttempts,
}

/// Bounded retry through transient scheduling states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Total signals sent per injection, including the first
    pub max_attempts: u32,

    /// Sleep between attempts, before yielding
    pub backoff_us: u64,
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_micros(self.backoff_us)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_us: DEFAULT_BACKOFF_US,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InjectorConfig {
    pub retry: RetryPolicy,
}

impl InjectorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = InjectorConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 100);
        assert_eq!(config.retry.backoff(), Duration::from_micros(100));
    }

    #[test]
    fn partial_retry_table() {
        let config = InjectorConfig::from_toml_str("[retry]\nmax-attempts = 3\n").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_us, DEFAULT_BACKOFF_US);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = InjectorConfig::from_toml_str("[retry]\nmax-attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoAttempts));
    }

    #[test]
    fn malformed_document_rejected() {
        let err = InjectorConfig::from_toml_str("[retry]\nmax-attempts = \"lots\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("dbgcall-config-{}.toml", std::process::id()));
        fs::write(&path, "[retry]\nbackoff-us = 0\n").unwrap();
        let config = InjectorConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.retry.backoff_us, 0);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = InjectorConfig::load("/nonexistent/dbgcall.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dbgcall.toml"));
    }
}

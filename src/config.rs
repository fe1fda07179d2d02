//! Configuration
//!
//! Environment-driven settings, validated at startup. `.env` loading is the
//! binary's responsibility; the library only reads the process environment.

use crate::error::{CoderError, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Remote model-service endpoint; the rule engine is used when unset.
    pub generator_url: Option<String>,
    /// Timeout for one generator call, in seconds.
    pub generator_timeout_secs: u64,
    /// Feedback endpoint for the remote generator, if any.
    pub feedback_url: Option<String>,
    /// PostgreSQL connection string; generation-only mode when unset.
    pub database_url: Option<String>,
    pub schema_path: String,
    /// SQLite file backing the learning cache.
    pub memory_path: String,
    pub max_attempts: u32,
    pub lang: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            generator_timeout_secs: 180,
            feedback_url: None,
            database_url: None,
            schema_path: "schema_catalog.json".into(),
            memory_path: "memory.db".into(),
            max_attempts: 3,
            lang: "es".into(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            generator_url: env::var("SQLCODER_URL").ok(),
            generator_timeout_secs: parse_env("SQLCODER_TIMEOUT", defaults.generator_timeout_secs)?,
            feedback_url: env::var("FEEDBACK_URL").ok(),
            database_url: env::var("DATABASE_URL").ok(),
            schema_path: env::var("SCHEMA_PATH").unwrap_or(defaults.schema_path),
            memory_path: env::var("MEMORY_PATH").unwrap_or(defaults.memory_path),
            max_attempts: parse_env("MAX_RETRIES", defaults.max_attempts)?,
            lang: env::var("LANG_HINT").unwrap_or(defaults.lang),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CoderError::Config("MAX_RETRIES must be at least 1".into()));
        }
        if self.generator_timeout_secs == 0 {
            return Err(CoderError::Config("SQLCODER_TIMEOUT must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoderError::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = AppConfig { max_attempts: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}

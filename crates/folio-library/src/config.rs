// ABOUTME: Configuration loading and validation for the folio engine.
// ABOUTME: Reads FOLIO_* environment variables into typed settings for the store, bridge, and scheduler.

use std::path::PathBuf;
use std::time::Duration;

use folio_agent::SchedulerConfig;
use folio_core::model::normalize_language_code;
use folio_store::BridgeConfig;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct FolioConfig {
    pub home: PathBuf,
    pub database: PathBuf,
    pub target_language: String,
    pub provider: String,
    pub model: Option<String>,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub bridge_timeout: Duration,
    pub debounce: Duration,
    /// Reload the durable translation queue when the engine starts. Not read
    /// from the environment; short-lived commands turn it off.
    pub resume_queue: bool,
}

impl FolioConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - FOLIO_HOME: data directory (default: ~/.folio)
    /// - FOLIO_DB: database file (default: $FOLIO_HOME/library.db)
    /// - FOLIO_TARGET_LANGUAGE: default translation language (default: en)
    /// - FOLIO_PROVIDER: translation provider (default: openai)
    /// - FOLIO_MODEL: model name (optional, provider default otherwise)
    /// - FOLIO_MAX_CONCURRENT: concurrent provider calls (default: 3)
    /// - FOLIO_MAX_ATTEMPTS: attempts per paragraph (default: 5)
    /// - FOLIO_RETRY_DELAY_MS: base retry delay (default: 1000)
    /// - FOLIO_BRIDGE_TIMEOUT_MS: wait for the store owner (default: 10000)
    /// - FOLIO_DEBOUNCE_MS: live query debounce (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let home = var("FOLIO_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".folio")
        });
        let database = var("FOLIO_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("library.db"));

        let target_language = normalize_language_code(
            &var("FOLIO_TARGET_LANGUAGE").unwrap_or_else(|| "en".to_string()),
        );
        let provider = var("FOLIO_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let model = var("FOLIO_MODEL");

        let max_concurrent = positive("FOLIO_MAX_CONCURRENT", var("FOLIO_MAX_CONCURRENT"), 3)?;
        let max_attempts = positive("FOLIO_MAX_ATTEMPTS", var("FOLIO_MAX_ATTEMPTS"), 5)?;
        let retry_delay = millis("FOLIO_RETRY_DELAY_MS", var("FOLIO_RETRY_DELAY_MS"), 1000)?;
        let bridge_timeout =
            millis("FOLIO_BRIDGE_TIMEOUT_MS", var("FOLIO_BRIDGE_TIMEOUT_MS"), 10_000)?;
        let debounce = millis("FOLIO_DEBOUNCE_MS", var("FOLIO_DEBOUNCE_MS"), 100)?;

        Ok(Self {
            home,
            database,
            target_language,
            provider,
            model,
            max_concurrent: max_concurrent as usize,
            max_attempts,
            retry_delay,
            bridge_timeout,
            debounce,
            resume_queue: true,
        })
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            ready_timeout: self.bridge_timeout,
            ..BridgeConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
            debounce: self.debounce,
            ..SchedulerConfig::default()
        }
    }
}

fn positive(var: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u32>() {
            Ok(parsed) if parsed >= 1 => Ok(parsed),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn millis(var: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(Duration::from_millis(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<FolioConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FolioConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn config_loads_defaults() {
        let config = load(&[("HOME", "/home/reader")]).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/reader/.folio"));
        assert_eq!(config.database, PathBuf::from("/home/reader/.folio/library.db"));
        assert_eq!(config.target_language, "en");
        assert_eq!(config.provider, "openai");
        assert!(config.model.is_none());
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.bridge_timeout, Duration::from_secs(10));
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert!(config.resume_queue);
    }

    #[test]
    fn config_reads_overrides() {
        let config = load(&[
            ("FOLIO_HOME", "/data/folio"),
            ("FOLIO_TARGET_LANGUAGE", " DE "),
            ("FOLIO_MODEL", "gpt-4o"),
            ("FOLIO_MAX_CONCURRENT", "8"),
            ("FOLIO_RETRY_DELAY_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/data/folio/library.db"));
        assert_eq!(config.target_language, "de");
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.scheduler_config().max_concurrent, 8);
        assert_eq!(config.scheduler_config().retry_delay, Duration::from_millis(250));
        assert_eq!(config.bridge_config().ready_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_rejects_bad_numbers() {
        let err = load(&[("FOLIO_MAX_CONCURRENT", "0")]).unwrap_err();
        assert!(err.to_string().contains("FOLIO_MAX_CONCURRENT"), "{err}");

        let err = load(&[("FOLIO_DEBOUNCE_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "FOLIO_DEBOUNCE_MS", .. }));
    }

    #[test]
    fn config_reads_process_environment() {
        // SAFETY: test-only code; no other test in this crate touches FOLIO_DB
        unsafe {
            std::env::set_var("FOLIO_DB", "/var/lib/folio/books.db");
        }
        let config = FolioConfig::from_env();
        // SAFETY: test-only code; no other test in this crate touches FOLIO_DB
        unsafe {
            std::env::remove_var("FOLIO_DB");
        }

        assert_eq!(config.unwrap().database, PathBuf::from("/var/lib/folio/books.db"));
    }
}

//! Configuration types for the settlement engine and its harness.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, TallyError, constants};

/// Engine tuning. Every field has a default, so an empty JSON object is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one unit of work. Must be shorter than the caller's
    /// own request deadline.
    pub db_timeout_ms: u64,
    /// Deadline for post-commit publishing, independent of `db_timeout_ms`.
    pub publish_timeout_ms: u64,
    /// Recently settled references kept in the in-process guard cache.
    pub idempotency_cache_size: usize,
    pub deferred_partitions: usize,
    pub deferred_channel_capacity: usize,
    /// Master-data allow-list of transaction types. Empty accepts all.
    pub accepted_transaction_types: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_timeout_ms: constants::DEFAULT_DB_TIMEOUT_MS,
            publish_timeout_ms: constants::DEFAULT_PUBLISH_TIMEOUT_MS,
            idempotency_cache_size: constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE,
            deferred_partitions: constants::DEFAULT_DEFERRED_PARTITIONS,
            deferred_channel_capacity: constants::DEFAULT_DEFERRED_CHANNEL_CAPACITY,
            accepted_transaction_types: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns `Serialization` for malformed JSON and `Configuration` for
    /// out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`TallyError::Configuration`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.db_timeout_ms == 0, "db_timeout_ms must be > 0"),
            (self.publish_timeout_ms == 0, "publish_timeout_ms must be > 0"),
            (
                self.idempotency_cache_size == 0,
                "idempotency_cache_size must be > 0",
            ),
            (self.deferred_partitions == 0, "deferred_partitions must be > 0"),
            (
                self.deferred_channel_capacity == 0,
                "deferred_channel_capacity must be > 0",
            ),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, reason)) => Err(TallyError::Configuration((*reason).to_string())),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Log output settings for binaries embedding the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: constants::DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_timeout(), Duration::from_millis(3000));
        assert_eq!(cfg.publish_timeout(), Duration::from_millis(2000));
        assert!(!cfg.logging.json);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let cfg = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.deferred_partitions, constants::DEFAULT_DEFERRED_PARTITIONS);
        assert!(cfg.accepted_transaction_types.is_empty());
    }

    #[test]
    fn partial_json_overrides() {
        let cfg = EngineConfig::from_json_str(
            r#"{"db_timeout_ms": 250, "logging": {"json": true}}"#,
        )
        .unwrap();
        assert_eq!(cfg.db_timeout_ms, 250);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn zero_partitions_rejected() {
        let err = EngineConfig::from_json_str(r#"{"deferred_partitions": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            TallyError::Configuration(ref m) if m.contains("deferred_partitions")
        ));
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, TallyError::Serialization(_)));
    }
}

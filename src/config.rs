//! Store and ingestion configuration.
//!
//! Every field has a serde default, so a config file only needs to name the
//! values it changes.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store configuration
///
/// # Example
///
/// ```rust
/// use cellstore::Config;
///
/// let config = Config::from_json(r#"{ "ingest_batch_size": 4 }"#).unwrap();
/// assert_eq!(config.ingest_batch_size, 4);
/// assert_eq!(config.max_ingest_attempts, Some(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Queue items merged per `drain` call
    #[serde(default = "Config::default_ingest_batch_size")]
    pub ingest_batch_size: usize,

    /// Failed merges an item survives before it is abandoned (None retries forever)
    #[serde(default = "Config::default_max_ingest_attempts")]
    pub max_ingest_attempts: Option<u32>,

    /// Period of the background drainer in milliseconds
    #[serde(default = "Config::default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Committed write transactions between automatic snapshots
    #[serde(default)]
    pub snapshot_auto_ops: Option<usize>,
}

impl Config {
    const fn default_ingest_batch_size() -> usize {
        8
    }

    const fn default_max_ingest_attempts() -> Option<u32> {
        Some(5)
    }

    const fn default_drain_interval_ms() -> u64 {
        250
    }

    pub fn with_ingest_batch_size(mut self, size: usize) -> Self {
        self.ingest_batch_size = size;
        self
    }

    pub fn with_max_ingest_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_ingest_attempts = attempts;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_snapshot_auto_ops(mut self, ops: usize) -> Self {
        self.snapshot_auto_ops = Some(ops);
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ingest_batch_size == 0 {
            return Err("Ingest batch size must be greater than zero".to_string());
        }

        if self.max_ingest_attempts == Some(0) {
            return Err("Max ingest attempts must be greater than zero".to_string());
        }

        if self.drain_interval_ms == 0 {
            return Err("Drain interval must be greater than zero".to_string());
        }

        if let Some(ops) = self.snapshot_auto_ops
            && ops == 0
        {
            return Err("Snapshot auto ops must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest_batch_size: Self::default_ingest_batch_size(),
            max_ingest_attempts: Self::default_max_ingest_attempts(),
            drain_interval_ms: Self::default_drain_interval_ms(),
            snapshot_auto_ops: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ingest_batch_size, 8);
        assert_eq!(config.max_ingest_attempts, Some(5));
        assert_eq!(config.drain_interval(), Duration::from_millis(250));
        assert!(config.snapshot_auto_ops.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = Config::default()
            .with_ingest_batch_size(2)
            .with_max_ingest_attempts(None)
            .with_snapshot_auto_ops(10);
        let json = config.to_json().unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"drain_interval_ms": 1000}"#).unwrap();
        assert_eq!(config.drain_interval_ms, 1000);
        assert_eq!(config.ingest_batch_size, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_json(r#"{"ingest_batch_size": 0}"#).is_err());
        assert!(Config::from_json(r#"{"max_ingest_attempts": 0}"#).is_err());
        assert!(Config::from_json(r#"{"snapshot_auto_ops": 0}"#).is_err());
        assert!(Config::default().with_drain_interval(Duration::ZERO).validate().is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_round_trip() {
        let config = Config::default().with_ingest_batch_size(3);
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}

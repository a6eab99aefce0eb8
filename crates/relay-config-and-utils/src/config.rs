//! Configuration for the relay, consumers and health server.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional JSON file, environment variables, and finally CLI flags applied
//! by the binary.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default Redis URL for the stream transport.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default number of outbox rows claimed per relay cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default idle sleep between empty polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default publish attempts before an event is dead-lettered.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff, in seconds.
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 60;

/// Default name of the shared event stream.
pub const DEFAULT_STREAM_NAME: &str = "domain-events";

/// Default name of the dead-letter stream.
pub const DEFAULT_DLQ_STREAM_NAME: &str = "domain-events-dlq";

/// Default approximate cap on the main stream length.
pub const DEFAULT_STREAM_MAXLEN: usize = 10_000;

/// Default approximate cap on the dead-letter stream length.
pub const DEFAULT_DLQ_MAXLEN: usize = 1_000;

/// Default lifetime of a relay's claim on an outbox row, in seconds.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;

/// Default bind address for the health/metrics server.
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_DATABASE_URL: &str = "sqlite://outbox.db";

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database (tests and dry runs only).
    Memory,
    /// Database file on disk.
    File(PathBuf),
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database, as a path or `sqlite://path` URL.
    pub database_url: String,
    /// Redis connection URL for the stream transport.
    pub redis_url: String,
    /// Maximum rows claimed per relay cycle.
    pub batch_size: usize,
    /// Idle sleep between empty polls, in seconds.
    pub poll_interval_secs: u64,
    /// Publish attempts before dead-lettering.
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff, in seconds.
    pub retry_base_delay_secs: u64,
    /// Shared event stream name.
    pub stream_name: String,
    /// Dead-letter stream name.
    pub dlq_stream_name: String,
    /// Approximate cap on the main stream length.
    pub stream_maxlen: usize,
    /// Approximate cap on the dead-letter stream length.
    pub dlq_maxlen: usize,
    /// Lifetime of a relay's claim on a row, in seconds.
    pub claim_lease_secs: u64,
    /// Bind address for the health/metrics server.
    pub health_addr: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format ("compact" or "json").
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_base_delay_secs: DEFAULT_RETRY_BASE_DELAY_SECS,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            dlq_stream_name: DEFAULT_DLQ_STREAM_NAME.to_string(),
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
            dlq_maxlen: DEFAULT_DLQ_MAXLEN,
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS,
            health_addr: DEFAULT_HEALTH_ADDR.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Create a Config with default values, then override from environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a JSON file, then override from environment.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific JSON file. Missing keys take defaults.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from a key lookup (normally the process environment).
    ///
    /// Unparseable numeric values are ignored with a warning so a typo never
    /// prevents the relay from starting with sane defaults.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = get("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = get("REDIS_URL") {
            self.redis_url = v;
        }
        if let Some(v) = get("STREAM_NAME") {
            self.stream_name = v;
        }
        if let Some(v) = get("DLQ_STREAM_NAME") {
            self.dlq_stream_name = v;
        }
        if let Some(v) = get("HEALTH_ADDR") {
            self.health_addr = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.log_format = v;
        }

        parse_into(get("BATCH_SIZE"), "BATCH_SIZE", &mut self.batch_size);
        parse_into(get("POLL_INTERVAL"), "POLL_INTERVAL", &mut self.poll_interval_secs);
        parse_into(
            get("MAX_RETRY_ATTEMPTS"),
            "MAX_RETRY_ATTEMPTS",
            &mut self.max_retry_attempts,
        );
        parse_into(
            get("RETRY_BASE_DELAY"),
            "RETRY_BASE_DELAY",
            &mut self.retry_base_delay_secs,
        );
        parse_into(get("STREAM_MAXLEN"), "STREAM_MAXLEN", &mut self.stream_maxlen);
        parse_into(get("DLQ_MAXLEN"), "DLQ_MAXLEN", &mut self.dlq_maxlen);
        parse_into(get("CLAIM_LEASE"), "CLAIM_LEASE", &mut self.claim_lease_secs);
    }

    /// Check invariants the relay relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::Config("BATCH_SIZE must be at least 1".to_string()));
        }
        if self.max_retry_attempts == 0 {
            return Err(CoreError::Config(
                "MAX_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.claim_lease_secs == 0 {
            return Err(CoreError::Config("CLAIM_LEASE must be at least 1 second".to_string()));
        }
        if self.stream_name == self.dlq_stream_name {
            return Err(CoreError::Config(
                "STREAM_NAME and DLQ_STREAM_NAME must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle sleep between empty polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Base delay for exponential backoff.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    /// Lifetime of a relay's claim on a row.
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    /// Resolve `database_url` into a location.
    ///
    /// Accepts `sqlite://path`, `sqlite:path`, a bare path, or `:memory:`.
    pub fn database_location(&self) -> CoreResult<DatabaseLocation> {
        let raw = self.database_url.trim();
        let path = raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
            .unwrap_or(raw);

        if path.is_empty() {
            return Err(CoreError::Config("DATABASE_URL is empty".to_string()));
        }
        if path == ":memory:" {
            return Ok(DatabaseLocation::Memory);
        }
        if raw.contains("://") && !raw.starts_with("sqlite://") {
            return Err(CoreError::Config(format!(
                "Unsupported DATABASE_URL scheme: {}",
                raw
            )));
        }
        Ok(DatabaseLocation::File(PathBuf::from(path)))
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_into<T: std::str::FromStr>(raw: Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = raw {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable configuration value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(60));
        assert_eq!(config.stream_maxlen, 10_000);
        assert_eq!(config.dlq_maxlen, 1_000);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("DATABASE_URL", "sqlite:///var/lib/outbox.db"),
            ("REDIS_URL", "redis://cache:6379"),
            ("BATCH_SIZE", "25"),
            ("POLL_INTERVAL", "2"),
            ("MAX_RETRY_ATTEMPTS", "2"),
            ("RETRY_BASE_DELAY", "10"),
            ("STREAM_NAME", "events"),
            ("DLQ_STREAM_NAME", "events-dlq"),
            ("LOG_LEVEL", "debug"),
        ]));

        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(config.retry_base_delay_secs, 10);
        assert_eq!(config.stream_name, "events");
        assert_eq!(config.dlq_stream_name, "events-dlq");
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.database_location().unwrap(),
            DatabaseLocation::File(PathBuf::from("/var/lib/outbox.db"))
        );
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("BATCH_SIZE", "lots"), ("POLL_INTERVAL", "")]));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_database_location_variants() {
        let mut config = Config::default();

        config.database_url = ":memory:".to_string();
        assert_eq!(config.database_location().unwrap(), DatabaseLocation::Memory);

        config.database_url = "sqlite::memory:".to_string();
        assert_eq!(config.database_location().unwrap(), DatabaseLocation::Memory);

        config.database_url = "data/outbox.db".to_string();
        assert_eq!(
            config.database_location().unwrap(),
            DatabaseLocation::File(PathBuf::from("data/outbox.db"))
        );

        config.database_url = "postgres://db/identity".to_string();
        assert!(config.database_location().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dlq_stream_name = config.stream_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_fills_missing_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{ "batch_size": 10, "stream_name": "audit" }"#).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.stream_name, "audit");
        assert_eq!(config.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = Config::load_from_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}

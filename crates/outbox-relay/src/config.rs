//! Relay settings.

use crate::{RelayError, RelayResult};
use relay_config_and_utils::{
    Config, DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_LEASE_SECS, DEFAULT_MAX_RETRY_ATTEMPTS,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RETRY_BASE_DELAY_SECS,
};
use std::time::Duration;

/// Relay batching, retry and lease settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identifies this relay's claims. Must be unique per running relay.
    pub relay_id: String,
    /// Maximum rows claimed per cycle.
    pub batch_size: usize,
    /// Idle sleep after an empty cycle or an infrastructure error.
    pub poll_interval: Duration,
    /// Publish attempts before an event is dead-lettered.
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,
    /// How long a claim protects a row from other relays.
    pub claim_lease: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_id: new_relay_id(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_secs(DEFAULT_RETRY_BASE_DELAY_SECS),
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
        }
    }
}

/// Fresh relay id: `relay-<uuid>`.
pub fn new_relay_id() -> String {
    format!("relay-{}", uuid::Uuid::new_v4())
}

impl RelayConfig {
    /// Build from the shared pipeline configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            relay_id: new_relay_id(),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval(),
            max_retry_attempts: config.max_retry_attempts,
            retry_base_delay: config.retry_base_delay(),
            claim_lease: config.claim_lease(),
        }
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.batch_size == 0 {
            return Err(RelayError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_retry_attempts == 0 {
            return Err(RelayError::Config(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.claim_lease.is_zero() {
            return Err(RelayError::Config("claim_lease must be positive".to_string()));
        }
        if self.relay_id.trim().is_empty() {
            return Err(RelayError::Config("relay_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn claim_lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_lease).unwrap_or(chrono::Duration::MAX)
    }

    pub(crate) fn poll_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.poll_interval).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_copies_settings() {
        let config = Config {
            batch_size: 25,
            poll_interval_secs: 2,
            max_retry_attempts: 3,
            retry_base_delay_secs: 10,
            claim_lease_secs: 30,
            ..Config::default()
        };

        let relay = RelayConfig::from_config(&config);
        assert_eq!(relay.batch_size, 25);
        assert_eq!(relay.poll_interval, Duration::from_secs(2));
        assert_eq!(relay.max_retry_attempts, 3);
        assert_eq!(relay.retry_base_delay, Duration::from_secs(10));
        assert_eq!(relay.claim_lease, Duration::from_secs(30));
        assert!(relay.relay_id.starts_with("relay-"));
        assert!(relay.validate().is_ok());
    }

    #[test]
    fn test_relay_ids_are_unique() {
        assert_ne!(RelayConfig::default().relay_id, RelayConfig::default().relay_id);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = RelayConfig {
            batch_size: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = RelayConfig {
            max_retry_attempts: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

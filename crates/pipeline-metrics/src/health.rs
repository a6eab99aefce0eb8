//! Health classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backlog above this is `Degraded`.
pub const BACKLOG_DEGRADED_THRESHOLD: u64 = 100;
/// Backlog above this is `Critical`.
pub const BACKLOG_CRITICAL_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// A dependency check failed.
    Unhealthy,
}

impl HealthStatus {
    /// Classify an outbox backlog.
    pub fn from_backlog(backlog: u64) -> Self {
        if backlog > BACKLOG_CRITICAL_THRESHOLD {
            Self::Critical
        } else if backlog > BACKLOG_DEGRADED_THRESHOLD {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// Whether the service can still make progress.
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

/// Result of one dependency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentCheck {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            error: Some(error.to_string()),
        }
    }

    /// Build from a check result.
    pub fn from_result<E: ToString>(name: impl Into<String>, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(name),
            Err(e) => Self::failed(name, e),
        }
    }
}

/// Detailed health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub backlog: u64,
    pub checks: Vec<ComponentCheck>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Any failed check makes the report `Unhealthy`; otherwise the backlog
    /// decides.
    pub fn new(checks: Vec<ComponentCheck>, backlog: u64, checked_at: DateTime<Utc>) -> Self {
        let status = if checks.iter().all(|c| c.healthy) {
            HealthStatus::from_backlog(backlog)
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            backlog,
            checks,
            checked_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_thresholds() {
        assert_eq!(HealthStatus::from_backlog(0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_backlog(100), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_backlog(101), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_backlog(1000), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_backlog(1001), HealthStatus::Critical);
    }

    #[test]
    fn test_failed_check_is_unhealthy() {
        let report = HealthReport::new(
            vec![
                ComponentCheck::ok("database"),
                ComponentCheck::from_result("stream", Err::<(), _>("connection refused")),
            ],
            0,
            Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.status.is_available());
        assert_eq!(report.checks[1].error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_report_uses_backlog_when_checks_pass() {
        let report = HealthReport::new(vec![ComponentCheck::ok("database")], 500, Utc::now());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.status.is_available());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert!(json["checks"][0].get("error").is_none());
    }
}

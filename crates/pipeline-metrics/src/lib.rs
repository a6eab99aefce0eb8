//! Observational counters for the outbox pipeline.
//!
//! Nothing here affects delivery. The relay and consumers receive an
//! `Arc<PipelineMetrics>` at construction and the health server reads
//! [`MetricsSnapshot`]s from the same value.

mod health;
mod metrics;

pub use health::{
    ComponentCheck, HealthReport, HealthStatus, BACKLOG_CRITICAL_THRESHOLD,
    BACKLOG_DEGRADED_THRESHOLD,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics, RecentError, RECENT_ERRORS_CAPACITY};

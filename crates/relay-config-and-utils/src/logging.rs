//! Logging initialization.
//!
//! Thin wrapper over the observability package so every binary configures
//! tracing the same way.

use observability::{LogConfig, LogFormat};
use std::path::PathBuf;

/// Initialize logging for a named service.
///
/// `RUST_LOG` overrides `level`. When `LOG_FILE` is set, log lines are also
/// appended as JSONL to that file.
pub fn init_logging(service_name: &str, level: &str, format: &str) {
    let log_path = std::env::var("LOG_FILE")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from);

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path,
        format: LogFormat::parse(format),
    });
}

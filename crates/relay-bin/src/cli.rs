//! Command-line arguments.
//!
//! Every flag overrides the matching environment variable, which in turn
//! overrides the built-in default. Numeric variables are read by
//! [`Config::from_env`] so a malformed value falls back to its default.

use clap::{Args, Parser, Subcommand};
use relay_config_and_utils::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "outbox-relay")]
#[command(about = "Transactional outbox relay and idempotent stream consumer")]
#[command(version)]
pub struct Cli {
    /// JSON config file; environment variables and flags override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish outbox rows to the stream and serve health/metrics.
    Relay(RelayArgs),
    /// Consume the stream into a domain's read model.
    Consume(ConsumeArgs),
    /// Print a detailed health report and exit non-zero when unhealthy.
    Health,
}

#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// SQLite database path or sqlite:// URL.
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Redis connection URL.
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Shared event stream.
    #[arg(long, global = true, env = "STREAM_NAME")]
    pub stream_name: Option<String>,

    /// Dead-letter stream.
    #[arg(long, global = true, env = "DLQ_STREAM_NAME")]
    pub dlq_stream_name: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (compact, json).
    #[arg(long, global = true, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct RelayArgs {
    /// Rows claimed per cycle.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Idle sleep between empty polls, in seconds.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Publish attempts before dead-lettering.
    #[arg(long)]
    pub max_retry_attempts: Option<u32>,

    /// Backoff base delay, in seconds.
    #[arg(long)]
    pub retry_base_delay: Option<u64>,

    /// Claim lease, in seconds.
    #[arg(long)]
    pub claim_lease: Option<u64>,

    /// Main stream length cap.
    #[arg(long)]
    pub stream_maxlen: Option<usize>,

    /// Dead-letter stream length cap.
    #[arg(long)]
    pub dlq_maxlen: Option<usize>,

    /// Health/metrics bind address.
    #[arg(long, env = "HEALTH_ADDR")]
    pub health_addr: Option<String>,

    /// Relay id; a random one is generated when omitted.
    #[arg(long, env = "RELAY_ID")]
    pub relay_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Consumer domain; also the default consumer group.
    #[arg(long, default_value = "identity")]
    pub domain: String,

    /// Consumer group name.
    #[arg(long, env = "CONSUMER_GROUP")]
    pub group: Option<String>,

    /// Consumer name within the group; a random one is generated when omitted.
    #[arg(long, env = "CONSUMER_NAME")]
    pub consumer: Option<String>,

    /// Entries requested per read.
    #[arg(long, default_value = "10")]
    pub batch_size: usize,

    /// Read block timeout in milliseconds.
    #[arg(long, default_value = "5000")]
    pub block_ms: u64,

    /// Idle time in milliseconds before an unacknowledged entry is reclaimed.
    #[arg(long, default_value = "30000")]
    pub reclaim_idle_ms: u64,
}

impl Cli {
    /// Build the effective configuration: file or defaults, then
    /// environment, then flags.
    pub fn resolve_config(&self) -> relay_config_and_utils::CoreResult<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::from_env(),
        };
        self.common.apply(&mut config);
        if let Command::Relay(args) = &self.command {
            args.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }
}

impl CommonArgs {
    fn apply(&self, config: &mut Config) {
        override_with(&mut config.database_url, &self.database_url);
        override_with(&mut config.redis_url, &self.redis_url);
        override_with(&mut config.stream_name, &self.stream_name);
        override_with(&mut config.dlq_stream_name, &self.dlq_stream_name);
        override_with(&mut config.log_level, &self.log_level);
        override_with(&mut config.log_format, &self.log_format);
    }
}

impl RelayArgs {
    fn apply(&self, config: &mut Config) {
        override_with(&mut config.batch_size, &self.batch_size);
        override_with(&mut config.poll_interval_secs, &self.poll_interval);
        override_with(&mut config.max_retry_attempts, &self.max_retry_attempts);
        override_with(&mut config.retry_base_delay_secs, &self.retry_base_delay);
        override_with(&mut config.claim_lease_secs, &self.claim_lease);
        override_with(&mut config.stream_maxlen, &self.stream_maxlen);
        override_with(&mut config.dlq_maxlen, &self.dlq_maxlen);
        override_with(&mut config.health_addr, &self.health_addr);
    }
}

fn override_with<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "outbox-relay",
            "--database-url",
            "sqlite:///tmp/flags.db",
            "relay",
            "--batch-size",
            "7",
            "--poll-interval",
            "2",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.common.apply(&mut config);
        if let Command::Relay(args) = &cli.command {
            args.apply(&mut config);
        } else {
            panic!("expected relay subcommand");
        }

        assert_eq!(config.database_url, "sqlite:///tmp/flags.db");
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.max_retry_attempts, Config::default().max_retry_attempts);
    }

    #[test]
    fn test_consume_defaults() {
        let cli = Cli::try_parse_from(["outbox-relay", "consume"]).unwrap();
        match cli.command {
            Command::Consume(args) => {
                assert_eq!(args.domain, "identity");
                assert_eq!(args.batch_size, 10);
                assert_eq!(args.block_ms, 5000);
                assert_eq!(args.reclaim_idle_ms, 30000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

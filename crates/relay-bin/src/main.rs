//! `outbox-relay` binary.
//!
//! Usage:
//!   outbox-relay relay     publish the outbox and serve /health and /metrics
//!   outbox-relay consume   apply stream events to a domain read model
//!   outbox-relay health    print a health report

mod cli;
mod commands;
mod server;

use clap::Parser;
use cli::{Cli, Command};
use relay_config_and_utils::init_logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    init_logging(server::SERVICE_NAME, &config.log_level, &config.log_format);

    info!(
        database_url = %config.database_url,
        stream = %config.stream_name,
        dlq_stream = %config.dlq_stream_name,
        "Configuration loaded"
    );

    match cli.command {
        Command::Relay(args) => commands::relay(config, args).await,
        Command::Consume(args) => commands::consume(config, args).await,
        Command::Health => commands::health(config).await,
    }
}

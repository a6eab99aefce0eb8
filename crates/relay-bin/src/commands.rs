//! Subcommand implementations.

use crate::cli::{ConsumeArgs, RelayArgs};
use crate::server::{self, AppState};
use anyhow::{bail, Context};
use event_consumer::{
    identity_registry, ConsumerConfig, ConsumerLoop, Dispatcher, IDENTITY_DOMAIN,
};
use event_stream::{RedisReaderConfig, RedisStreamConfig, RedisStreamReader, RedisStreamTransport};
use outbox_database::{queries, AsyncDatabase};
use outbox_relay::{Relay, RelayConfig};
use pipeline_metrics::{ComponentCheck, HealthReport, PipelineMetrics};
use relay_config_and_utils::{Config, DatabaseLocation};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

async fn open_database(config: &Config) -> anyhow::Result<AsyncDatabase> {
    let db = match config.database_location()? {
        DatabaseLocation::Memory => {
            warn!("Using an in-memory database; nothing will persist");
            AsyncDatabase::open_in_memory().await?
        }
        DatabaseLocation::File(path) => AsyncDatabase::open(&path)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))?,
    };
    Ok(db)
}

fn stream_config(config: &Config) -> RedisStreamConfig {
    RedisStreamConfig {
        redis_url: config.redis_url.clone(),
        stream_name: config.stream_name.clone(),
        dlq_stream_name: config.dlq_stream_name.clone(),
        stream_maxlen: config.stream_maxlen as u64,
        dlq_maxlen: config.dlq_maxlen as u64,
    }
}

/// Broadcast channel fired once on ctrl-c.
fn shutdown_channel() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, finishing current work"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = signal_tx.send(());
    });
    tx
}

/// Call `connect` every `retry_delay` until it succeeds. Returns `None` if
/// `shutdown` fires first.
async fn connect_with_retry<T, E, F, Fut>(
    target: &str,
    retry_delay: Duration,
    shutdown: &mut broadcast::Receiver<()>,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let result = tokio::select! {
            _ = shutdown.recv() => return None,
            result = connect() => result,
        };
        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, target, "Connected after retrying");
                }
                return Some(value);
            }
            Err(e) => {
                warn!(
                    attempt,
                    target,
                    error = %e,
                    retry_in_secs = retry_delay.as_secs_f64(),
                    "Failed to connect, retrying..."
                );
                tokio::select! {
                    _ = shutdown.recv() => return None,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }
}

pub async fn relay(config: Config, args: RelayArgs) -> anyhow::Result<()> {
    // Bad settings are not worth retrying.
    config.database_location()?;

    let shutdown = shutdown_channel();
    let mut startup = shutdown.subscribe();
    let retry_delay = config.poll_interval();

    let Some(db) =
        connect_with_retry("database", retry_delay, &mut startup, || open_database(&config)).await
    else {
        info!("Shutdown requested before the database was reachable");
        return Ok(());
    };
    let redis = stream_config(&config);
    let Some(transport) = connect_with_retry("stream", retry_delay, &mut startup, || {
        RedisStreamTransport::connect(redis.clone())
    })
    .await
    else {
        info!("Shutdown requested before the stream was reachable");
        db.close().await?;
        return Ok(());
    };
    let transport = Arc::new(transport);
    let metrics = Arc::new(PipelineMetrics::new());

    let mut relay_config = RelayConfig::from_config(&config);
    if let Some(relay_id) = args.relay_id {
        relay_config.relay_id = relay_id;
    }
    let relay = Relay::new(db.clone(), transport.clone(), metrics.clone(), relay_config)?;

    let state = AppState {
        db: db.clone(),
        transport,
        metrics,
    };
    let mut server_shutdown = shutdown.subscribe();
    let health_addr = config.health_addr.clone();
    let server = tokio::spawn(async move {
        let signal = async move {
            let _ = server_shutdown.recv().await;
        };
        if let Err(e) = server::serve(state, &health_addr, signal).await {
            error!(error = %e, addr = %health_addr, "Health server failed");
        }
    });

    relay.run(startup).await?;

    // The relay may also stop on its own; make sure the server follows.
    let _ = shutdown.send(());
    if let Err(e) = server.await {
        warn!(error = %e, "Health server task ended abnormally");
    }
    db.close().await?;
    Ok(())
}

pub async fn consume(config: Config, args: ConsumeArgs) -> anyhow::Result<()> {
    let registry = match args.domain.as_str() {
        IDENTITY_DOMAIN => identity_registry()?,
        other => bail!("no handlers are registered for consumer domain '{other}'"),
    };

    config.database_location()?;
    let shutdown = shutdown_channel();
    let mut startup = shutdown.subscribe();
    let retry_delay = config.poll_interval();

    let Some(db) =
        connect_with_retry("database", retry_delay, &mut startup, || open_database(&config)).await
    else {
        return Ok(());
    };
    let metrics = Arc::new(PipelineMetrics::new());
    let dispatcher = Dispatcher::new(db.clone(), registry, metrics).await?;

    let group = args.group.unwrap_or_else(|| args.domain.clone());
    let consumer = args
        .consumer
        .unwrap_or_else(|| format!("{}-{}", args.domain, uuid::Uuid::new_v4()));
    info!(
        domain = %args.domain,
        group = %group,
        consumer = %consumer,
        stream = %config.stream_name,
        "Consumer configuration loaded"
    );

    let reader_config = RedisReaderConfig {
        redis_url: config.redis_url.clone(),
        stream_name: config.stream_name.clone(),
        group,
        consumer,
    };
    let Some(reader) = connect_with_retry("consumer group", retry_delay, &mut startup, || {
        RedisStreamReader::connect(reader_config.clone())
    })
    .await
    else {
        db.close().await?;
        return Ok(());
    };
    match reader.pending_count().await {
        Ok(pending) => info!(pending, "Joined consumer group"),
        Err(e) => warn!(error = %e, "Failed to read pending entry count"),
    }

    let consumer = ConsumerLoop::new(
        Arc::new(reader),
        dispatcher,
        ConsumerConfig {
            batch_size: args.batch_size,
            block: Duration::from_millis(args.block_ms),
            reclaim_idle: Duration::from_millis(args.reclaim_idle_ms),
            ..ConsumerConfig::default()
        },
    );

    consumer.run(startup).await?;
    db.close().await?;
    Ok(())
}

pub async fn health(config: Config) -> anyhow::Result<()> {
    let db = open_database(&config).await?;

    let body = match RedisStreamTransport::connect(stream_config(&config)).await {
        Ok(transport) => {
            let mut streams = serde_json::Map::new();
            for name in [&config.stream_name, &config.dlq_stream_name] {
                match transport.stream_len(name).await {
                    Ok(len) => {
                        streams.insert(name.clone(), len.into());
                    }
                    Err(e) => warn!(stream = %name, error = %e, "Failed to read stream length"),
                }
            }

            let state = AppState {
                db: db.clone(),
                transport: Arc::new(transport),
                metrics: Arc::new(PipelineMetrics::new()),
            };
            let mut body = serde_json::to_value(server::detailed_health(&state).await)?;
            body["streams"] = serde_json::Value::Object(streams);
            body
        }
        Err(e) => {
            let backlog = db.call(|conn| queries::count_backlog(conn)).await.unwrap_or(0);
            let report = HealthReport::new(
                vec![
                    ComponentCheck::from_result("database", db.health_check().await),
                    ComponentCheck::failed("stream", e),
                ],
                backlog,
                chrono::Utc::now(),
            );
            serde_json::to_value(report)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    if body["status"] == "unhealthy" {
        bail!("pipeline is unhealthy");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_connect_with_retry_until_reachable() {
        let (_tx, mut shutdown) = broadcast::channel(1);
        let calls = AtomicU32::new(0);

        let connected = connect_with_retry("stream", Duration::from_millis(5), &mut shutdown, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(connected, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_with_retry_stops_on_shutdown() {
        let (tx, mut shutdown) = broadcast::channel(1);
        let calls = AtomicU32::new(0);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        let connected: Option<()> = tokio::time::timeout(
            Duration::from_secs(5),
            connect_with_retry("database", Duration::from_millis(5), &mut shutdown, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("unable to open database file") }
            }),
        )
        .await
        .unwrap();

        assert!(connected.is_none());
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unreachable_stream_gives_up_on_shutdown() {
        let mut config = Config::default();
        config.redis_url = "redis://127.0.0.1:1/".to_string();
        config.poll_interval_secs = 1;

        let (tx, mut shutdown) = broadcast::channel(1);
        let redis = stream_config(&config);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let transport = connect_with_retry("stream", config.poll_interval(), &mut shutdown, || {
            RedisStreamTransport::connect(redis.clone())
        })
        .await;
        assert!(transport.is_none());
    }
}

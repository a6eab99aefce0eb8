//! Redis Streams transport.
//!
//! Appends use `XADD ... MAXLEN ~ n *` so the server trims approximately.
//! Consumers read through a consumer group with `XREADGROUP` and `XACK`;
//! entries that are never acknowledged stay in the group's pending list
//! until `XAUTOCLAIM` hands them to a consumer again.

use crate::entry::EntryFields;
use crate::transport::{StreamReader, StreamTransport};
use crate::{DlqEntry, EventEnvelope, StreamEntry, StreamError, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection and stream settings for the append side.
#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub redis_url: String,
    pub stream_name: String,
    pub dlq_stream_name: String,
    pub stream_maxlen: u64,
    pub dlq_maxlen: u64,
}

/// Connection and group settings for the read side.
#[derive(Debug, Clone)]
pub struct RedisReaderConfig {
    pub redis_url: String,
    pub stream_name: String,
    /// Consumer group name, one per consumer domain.
    pub group: String,
    /// Consumer name, unique per process.
    pub consumer: String,
}

fn should_reconnect(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

/// Holds a multiplexed connection that can be swapped after a drop.
struct Connection {
    client: Client,
    conn: Mutex<MultiplexedConnection>,
}

impl Connection {
    async fn open(redis_url: &str) -> StreamResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn: Mutex::new(conn),
        })
    }

    fn get(&self) -> MultiplexedConnection {
        self.conn.lock().clone()
    }

    async fn reconnect(&self) -> StreamResult<()> {
        info!("Reconnecting to Redis...");
        let fresh = self.client.get_multiplexed_async_connection().await?;
        *self.conn.lock() = fresh;
        Ok(())
    }

    /// Reconnect after connection-level failures so the next call can succeed.
    async fn recover(&self, err: &RedisError) {
        if should_reconnect(err) {
            if let Err(e) = self.reconnect().await {
                warn!(error = %e, "Redis reconnect failed");
            }
        }
    }
}

/// Relay-side transport over Redis Streams.
pub struct RedisStreamTransport {
    connection: Connection,
    config: RedisStreamConfig,
}

impl RedisStreamTransport {
    /// Connect to Redis.
    pub async fn connect(config: RedisStreamConfig) -> StreamResult<Self> {
        let connection = Connection::open(&config.redis_url).await?;
        info!(
            stream = %config.stream_name,
            dlq_stream = %config.dlq_stream_name,
            "Connected to Redis stream transport"
        );
        Ok(Self { connection, config })
    }

    async fn xadd(&self, stream: &str, maxlen: u64, fields: &EntryFields) -> StreamResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.connection.get();
        let result: RedisResult<String> = cmd.query_async(&mut conn).await;
        match result {
            Ok(entry_id) => Ok(entry_id),
            Err(e) => {
                self.connection.recover(&e).await;
                Err(e.into())
            }
        }
    }

    /// Current length of a stream.
    pub async fn stream_len(&self, stream: &str) -> StreamResult<u64> {
        let mut conn = self.connection.get();
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    pub fn config(&self) -> &RedisStreamConfig {
        &self.config
    }
}

#[async_trait]
impl StreamTransport for RedisStreamTransport {
    async fn append(&self, envelope: &EventEnvelope) -> StreamResult<String> {
        let fields = envelope.to_fields()?;
        let entry_id = self
            .xadd(&self.config.stream_name, self.config.stream_maxlen, &fields)
            .await?;
        debug!(
            event_id = %envelope.event_id,
            entry_id = %entry_id,
            stream = %self.config.stream_name,
            "Appended event to stream"
        );
        Ok(entry_id)
    }

    async fn append_dlq(&self, entry: &DlqEntry) -> StreamResult<String> {
        let fields = entry.to_fields()?;
        let entry_id = self
            .xadd(&self.config.dlq_stream_name, self.config.dlq_maxlen, &fields)
            .await?;
        debug!(
            event_id = %entry.original_event_id,
            entry_id = %entry_id,
            stream = %self.config.dlq_stream_name,
            "Appended event to dead-letter stream"
        );
        Ok(entry_id)
    }

    async fn ping(&self) -> StreamResult<()> {
        let mut conn = self.connection.get();
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.connection.recover(&e).await;
                Err(e.into())
            }
        }
    }
}

/// Consumer-group reader over Redis Streams.
pub struct RedisStreamReader {
    connection: Connection,
    config: RedisReaderConfig,
}

impl RedisStreamReader {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(config: RedisReaderConfig) -> StreamResult<Self> {
        let connection = Connection::open(&config.redis_url).await?;
        let reader = Self { connection, config };
        reader.ensure_consumer_group().await?;
        Ok(reader)
    }

    /// Create the consumer group from the start of the stream.
    ///
    /// A group that already exists (`BUSYGROUP`) is left as is.
    async fn ensure_consumer_group(&self) -> StreamResult<()> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.connection.get())
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.group,
                    "Created consumer group"
                );
            }
            Err(e) => {
                if e.to_string().contains("BUSYGROUP") {
                    debug!(
                        stream = %self.config.stream_name,
                        group = %self.config.group,
                        "Consumer group already exists"
                    );
                } else {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Number of delivered but unacknowledged entries in the group.
    pub async fn pending_count(&self) -> StreamResult<i64> {
        let result: redis::Value = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.group)
            .query_async(&mut self.connection.get())
            .await?;

        // [count, min_id, max_id, [[consumer, count], ...]]
        if let redis::Value::Array(arr) = result {
            if let Some(redis::Value::Int(count)) = arr.first() {
                return Ok(*count);
            }
        }
        Ok(0)
    }

    /// Reconnect and re-create the group if needed.
    pub async fn reconnect(&self) -> StreamResult<()> {
        self.connection.reconnect().await?;
        self.ensure_consumer_group().await
    }
}

#[async_trait]
impl StreamReader for RedisStreamReader {
    async fn read(&self, count: usize, block: Duration) -> StreamResult<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(count.max(1));
        let block_ms = block.as_millis() as u64;
        if block_ms > 0 {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(&self.config.stream_name).arg(">");

        let result: RedisResult<redis::Value> = cmd.query_async(&mut self.connection.get()).await;
        match result {
            Ok(value) => parse_xreadgroup_reply(value),
            Err(e) => {
                self.connection.recover(&e).await;
                Err(e.into())
            }
        }
    }

    async fn reclaim(&self, min_idle: Duration, count: usize) -> StreamResult<Vec<StreamEntry>> {
        let result: RedisResult<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut self.connection.get())
            .await;

        let entries = match result {
            Ok(value) => parse_xautoclaim_reply(value)?,
            Err(e) => {
                self.connection.recover(&e).await;
                return Err(e.into());
            }
        };

        // Entries trimmed since delivery cannot be handled; drop them from the PEL.
        let (trimmed, live): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| entry.fields.is_empty());
        for entry in &trimmed {
            warn!(
                entry_id = %entry.id,
                group = %self.config.group,
                "Reclaimed entry was trimmed from the stream, acknowledging"
            );
            self.ack(&entry.id).await?;
        }

        if !live.is_empty() {
            info!(
                count = live.len(),
                group = %self.config.group,
                consumer = %self.config.consumer,
                "Reclaimed idle pending entries"
            );
        }
        Ok(live)
    }

    async fn ack(&self, entry_id: &str) -> StreamResult<()> {
        let mut conn = self.connection.get();
        let acked: i64 = conn
            .xack(&self.config.stream_name, &self.config.group, &[entry_id])
            .await?;

        if acked == 1 {
            debug!(entry_id = %entry_id, group = %self.config.group, "Acknowledged entry");
        } else {
            warn!(
                entry_id = %entry_id,
                group = %self.config.group,
                "XACK returned {}, entry may not exist",
                acked
            );
        }
        Ok(())
    }
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an `XREADGROUP` reply into entries.
///
/// Shape: `[[stream, [[id, [field, value, ...]], ...]], ...]`, or nil when
/// the block timed out.
pub(crate) fn parse_xreadgroup_reply(value: redis::Value) -> StreamResult<Vec<StreamEntry>> {
    let streams = match value {
        redis::Value::Array(streams) => streams,
        redis::Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(StreamError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                other
            )))
        }
    };

    let mut entries = Vec::new();
    for stream in streams {
        let stream = match stream {
            redis::Value::Array(s) if s.len() >= 2 => s,
            _ => {
                return Err(StreamError::Protocol(
                    "Expected [name, messages] for stream".to_string(),
                ))
            }
        };

        let messages = match &stream[1] {
            redis::Value::Array(m) => m,
            redis::Value::Nil => continue,
            _ => {
                return Err(StreamError::Protocol(
                    "Expected array for messages".to_string(),
                ))
            }
        };

        entries.extend(parse_messages(messages)?);
    }

    Ok(entries)
}

/// Parse an `XAUTOCLAIM` reply into entries.
///
/// Shape: `[next_cursor, [[id, [field, value, ...]], ...], [deleted_id, ...]]`.
/// Redis 6.2 omits the deleted list and reports trimmed entries with nil
/// fields instead.
pub(crate) fn parse_xautoclaim_reply(value: redis::Value) -> StreamResult<Vec<StreamEntry>> {
    let parts = match value {
        redis::Value::Array(parts) if parts.len() >= 2 => parts,
        other => {
            return Err(StreamError::Protocol(format!(
                "Unexpected XAUTOCLAIM response: {:?}",
                other
            )))
        }
    };

    match &parts[1] {
        redis::Value::Array(messages) => parse_messages(messages),
        redis::Value::Nil => Ok(Vec::new()),
        _ => Err(StreamError::Protocol(
            "Expected array for claimed messages".to_string(),
        )),
    }
}

/// Parse `[[id, [field, value, ...]], ...]`.
fn parse_messages(messages: &[redis::Value]) -> StreamResult<Vec<StreamEntry>> {
    let mut entries = Vec::with_capacity(messages.len());
    for message in messages {
        let message = match message {
            redis::Value::Array(m) if m.len() >= 2 => m,
            _ => {
                return Err(StreamError::Protocol(
                    "Expected [id, fields] for message".to_string(),
                ))
            }
        };

        let id = value_to_string(&message[0]).ok_or_else(|| {
            StreamError::Protocol(format!("Expected string for entry id, got {:?}", message[0]))
        })?;

        // A nil field list means the entry was trimmed after delivery.
        let raw_fields: &[redis::Value] = match &message[1] {
            redis::Value::Array(f) => f.as_slice(),
            redis::Value::Nil => &[],
            _ => {
                return Err(StreamError::Protocol(
                    "Expected array for fields".to_string(),
                ))
            }
        };

        let mut fields = HashMap::with_capacity(raw_fields.len() / 2);
        for pair in raw_fields.chunks_exact(2) {
            if let (Some(name), Some(value)) = (value_to_string(&pair[0]), value_to_string(&pair[1])) {
                fields.insert(name, value);
            }
        }

        entries.push(StreamEntry { id, fields });
    }

    Ok(entries)
}

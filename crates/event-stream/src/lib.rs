//! Stream envelopes and transports.
//!
//! The relay appends [`EventEnvelope`]s through a [`StreamTransport`] and
//! consumers read them back through a [`StreamReader`]. Every entry on the
//! wire is a flat map of string fields; JSON payloads travel as strings.
//!
//! Two implementations ship here:
//! - [`RedisStreamTransport`] / [`RedisStreamReader`] over Redis Streams
//! - [`InMemoryStreamTransport`], an in-process stream with failure injection

mod entry;
mod envelope;
mod error;
mod memory;
mod redis_stream;
mod transport;

pub use entry::{wire_timestamp, EntryFields, StreamEntry};
pub use envelope::{topic_for, DlqEntry, EventEnvelope, SCHEMA_VERSION};
pub use error::{StreamError, StreamResult};
pub use memory::InMemoryStreamTransport;
pub use redis_stream::{RedisReaderConfig, RedisStreamConfig, RedisStreamReader, RedisStreamTransport};
pub use transport::{StreamReader, StreamTransport};

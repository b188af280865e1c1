//! The append-only event log: codec, transport, and the log-backed
//! message repository.
//!
//! Events are self-describing on the wire: a JSON payload plus a sidecar
//! `eventType` header carrying the variant tag. Decoding is header-first:
//! a record without a recognised tag is rejected before its payload is
//! touched.
//!
//! Transport is Redis Streams: one stream, `XADD` on the producer side,
//! `XREADGROUP`/`XACK` consumer groups on the consumer side (the sink and
//! the watcher each run their own group). An in-memory log with the same
//! contract backs the test harnesses.

mod event;
mod memory;
mod record;
mod redis_stream;
mod repo;

pub use event::{
    CodecError, Event, EventId, EventType, MessageDeleted, MessageInserted, EVENT_TYPE_HEADER,
};
pub use memory::{MemoryLog, MemoryLogConsumer, MemoryLogProducer};
pub use record::{LogConsumer, LogError, LogProducer, LogRecord, LogResult, NewLogRecord, RecordId};
pub use redis_stream::{RedisLogConsumer, RedisLogProducer};
pub use repo::LogBackedRepository;

//! Log records and the transport seams.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::CodecError;

/// Transport errors.
#[derive(Error, Debug)]
pub enum LogError {
    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The log reply did not have the expected shape.
    #[error("log protocol error: {0}")]
    Protocol(String),

    /// The log was closed underneath the consumer.
    #[error("log closed")]
    Closed,

    /// Codec failure while building a record.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Position of a record in the log (Redis stream entry id, `1690000000000-0`
/// style). Ordered the way the log orders records.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A record as fetched from the log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub id: RecordId,
    /// Partition key (the topic id).
    pub key: String,
    /// Raw `eventType` header, if the record carried one.
    pub event_type: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// A record about to be appended.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLogRecord {
    /// Partition key (the topic id).
    pub key: String,
    /// The `eventType` header value.
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// Appends records to the log.
#[async_trait]
pub trait LogProducer: Send + Sync {
    async fn append(&self, record: NewLogRecord) -> LogResult<RecordId>;
}

/// One consumer inside a consumer group.
///
/// `fetch` blocks up to the transport's poll interval and returns `None`
/// when it elapses with nothing new. Fetched records stay pending until
/// `commit` acknowledges them; an uncommitted record is redelivered to the
/// group after a restart, which is the at-least-once contract.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    async fn fetch(&mut self) -> LogResult<Option<LogRecord>>;

    /// Commits the group cursor through the given records.
    async fn commit(&mut self, ids: &[RecordId]) -> LogResult<()>;
}

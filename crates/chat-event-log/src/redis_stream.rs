//! Redis Streams transport.
//!
//! One stream holds every event; appends preserve total order, which is
//! stronger than the per-key order the contract requires. Consumers run in
//! consumer groups (`XREADGROUP`/`XACK`), so the sink and the watcher each
//! keep their own cursor over the same stream.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tracing::{debug, info};

use crate::event::EVENT_TYPE_HEADER;
use crate::record::{LogConsumer, LogError, LogProducer, LogRecord, LogResult, NewLogRecord, RecordId};

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";

type ReadGroupReply = Option<Vec<(String, Vec<(String, HashMap<String, Vec<u8>>)>)>>;

/// Appends records to a Redis stream.
pub struct RedisLogProducer {
    conn: MultiplexedConnection,
    stream_key: String,
}

impl RedisLogProducer {
    /// Connects to Redis and targets `stream_key`.
    pub async fn connect(redis_url: &str, stream_key: impl Into<String>) -> LogResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            stream_key: stream_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl LogProducer for RedisLogProducer {
    async fn append(&self, record: NewLogRecord) -> LogResult<RecordId> {
        let mut conn = self.conn.clone();

        let id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(FIELD_KEY)
            .arg(&record.key)
            .arg(EVENT_TYPE_HEADER)
            .arg(&record.event_type)
            .arg(FIELD_PAYLOAD)
            .arg(&record.payload)
            .query_async(&mut conn)
            .await?;

        debug!(stream = %self.stream_key, record_id = %id, key = %record.key, "record appended");
        Ok(RecordId(id))
    }
}

/// One consumer of a consumer group over the event stream.
pub struct RedisLogConsumer {
    client: Client,
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    consumer_name: String,
    block_ms: u64,
}

impl RedisLogConsumer {
    /// Connects and ensures the consumer group exists (starting from the
    /// beginning of the stream, so a fresh group replays history).
    pub async fn connect(
        redis_url: &str,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        block_ms: u64,
    ) -> LogResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let group = group.into();

        let consumer = Self {
            client,
            conn,
            stream_key: stream_key.into(),
            consumer_name: format!("{group}-{}", uuid::Uuid::new_v4()),
            group,
            block_ms,
        };
        consumer.ensure_consumer_group().await?;
        Ok(consumer)
    }

    async fn ensure_consumer_group(&self) -> LogResult<()> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn.clone())
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.stream_key, group = %self.group, "created consumer group");
                Ok(())
            }
            // BUSYGROUP: the group already exists.
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream_key, group = %self.group, "consumer group exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-establishes the connection after a transport failure.
    pub async fn reconnect(&mut self) -> LogResult<()> {
        self.conn = self.client.get_multiplexed_async_connection().await?;
        Ok(())
    }

    fn record_from_fields(
        id: String,
        mut fields: HashMap<String, Vec<u8>>,
    ) -> LogResult<LogRecord> {
        let payload = fields
            .remove(FIELD_PAYLOAD)
            .ok_or_else(|| LogError::Protocol(format!("record {id} has no payload field")))?;
        let key = fields
            .remove(FIELD_KEY)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .unwrap_or_default();
        let event_type = fields.remove(EVENT_TYPE_HEADER);

        Ok(LogRecord {
            id: RecordId(id),
            key,
            event_type,
            payload,
        })
    }
}

#[async_trait::async_trait]
impl LogConsumer for RedisLogConsumer {
    async fn fetch(&mut self) -> LogResult<Option<LogRecord>> {
        let reply: ReadGroupReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(&mut self.conn)
            .await?;

        let entry = reply
            .into_iter()
            .flatten()
            .next()
            .and_then(|(_, entries)| entries.into_iter().next());

        match entry {
            // Block timeout expired with nothing new.
            None => Ok(None),
            Some((id, fields)) => Self::record_from_fields(id, fields).map(Some),
        }
    }

    async fn commit(&mut self, ids: &[RecordId]) -> LogResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("XACK");
        cmd.arg(&self.stream_key).arg(&self.group);
        for id in ids {
            cmd.arg(id.as_str());
        }

        let acked: i64 = cmd.query_async(&mut self.conn).await?;
        debug!(stream = %self.stream_key, group = %self.group, acked, "cursor committed");
        Ok(())
    }
}

//! The log-backed message repository.
//!
//! Writes publish events to the log partitioned by topic id; reads query
//! the bucketed store the sink materialises. The producer never waits for
//! materialisation.

use async_trait::async_trait;
use chat_bucket_store::BucketStore;
use chat_core::{CoreError, CoreResult, Message, MessageRepository, Pagination, TopicId, UserId};
use tracing::error;

use crate::event::Event;
use crate::record::{LogProducer, NewLogRecord};

/// Repository over a log producer and the bucket store.
pub struct LogBackedRepository<P> {
    producer: P,
    store: BucketStore,
}

impl<P: LogProducer> LogBackedRepository<P> {
    pub fn new(producer: P, store: BucketStore) -> Self {
        Self { producer, store }
    }

    async fn publish(&self, event: &Event) -> CoreResult<()> {
        let payload = event
            .encode()
            .map_err(|e| CoreError::Repository(e.to_string()))?;

        let record = NewLogRecord {
            key: event.topic_id().to_string(),
            event_type: event.event_type().as_str().to_string(),
            payload,
        };

        if let Err(e) = self.producer.append(record).await {
            error!(
                topic_id = %event.topic_id(),
                event_type = %event.event_type(),
                error = %e,
                "can not append event to the log"
            );
            return Err(CoreError::Repository(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<P: LogProducer> MessageRepository for LogBackedRepository<P> {
    async fn list_messages(
        &self,
        topic_id: &TopicId,
        page: &Pagination,
    ) -> CoreResult<Vec<Message>> {
        self.store
            .list_messages(topic_id, page)
            .map_err(|e| CoreError::Repository(e.to_string()))
    }

    async fn send_to_topic(
        &self,
        sender: &UserId,
        topic_id: &TopicId,
        text: &str,
    ) -> CoreResult<Message> {
        let msg = Message::new(sender.clone(), topic_id.clone(), text);
        self.publish(&Event::inserted(msg.clone())).await?;
        Ok(msg)
    }

    async fn delete_message(&self, msg: &Message) -> CoreResult<()> {
        // Idempotent at the producer: a delete for an already-deleted id is
        // accepted; the sink's conditional update makes the replay a no-op.
        self.publish(&Event::deleted(msg)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::memory::MemoryLog;

    fn repo(log: &MemoryLog) -> LogBackedRepository<crate::memory::MemoryLogProducer> {
        LogBackedRepository::new(log.producer(), BucketStore::in_memory().unwrap())
    }

    #[tokio::test]
    async fn send_publishes_one_inserted_event() {
        let log = MemoryLog::new();
        let repo = repo(&log);

        let msg = repo
            .send_to_topic(&"u1".into(), &"t".into(), "hi")
            .await
            .unwrap();

        assert_eq!(msg.version, 1);
        assert_eq!(log.len(), 1);

        let records = log.records();
        assert_eq!(records[0].key, "t");
        let event = Event::decode(
            records[0].event_type.as_deref(),
            &records[0].payload,
        )
        .unwrap();
        assert_eq!(event.event_type(), EventType::MessageInserted);
        match event {
            Event::Inserted(e) => assert_eq!(e.msg, msg),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_publishes_under_the_same_key() {
        let log = MemoryLog::new();
        let repo = repo(&log);

        let msg = repo
            .send_to_topic(&"u1".into(), &"t".into(), "hi")
            .await
            .unwrap();
        repo.delete_message(&msg).await.unwrap();
        // Idempotent: publishing again is accepted.
        repo.delete_message(&msg).await.unwrap();

        let records = log.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.key == "t"));

        let event = Event::decode(records[1].event_type.as_deref(), &records[1].payload).unwrap();
        match event {
            Event::Deleted(e) => {
                assert_eq!(e.message_id, msg.id);
                assert_eq!(e.message_version, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_reads_the_materialised_store() {
        let log = MemoryLog::new();
        let repo = repo(&log);

        // Nothing materialised yet: the producer does not wait for the sink.
        let listed = repo
            .list_messages(&"t".into(), &Pagination::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}

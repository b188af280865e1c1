//! Per-event-type transaction handlers.
//!
//! Handlers accumulate events as a batch is decoded and write nothing until
//! `apply` runs inside a store session. The inserted handler must apply
//! before the deleted handler so a message and its tombstone landing in one
//! batch resolve in log order.

use std::collections::HashMap;

use chat_bucket_store::{Bucket, StoreResult, StoreSession, TombstoneOutcome, BUCKET_CAPACITY};
use chat_core::{Message, TopicId};
use chat_event_log::{MessageDeleted, MessageInserted};
use tracing::debug;

/// Accumulates `MessageInserted` events and materialises them into buckets.
#[derive(Default)]
pub struct InsertedHandler {
    events: Vec<MessageInserted>,
}

impl InsertedHandler {
    pub fn record(&mut self, event: MessageInserted) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Applies the accumulated inserts: group by topic, drop ids the store
    /// already covers (replayed records), fill the topic's open bucket to
    /// capacity, spill the remainder into fresh buckets of at most
    /// [`BUCKET_CAPACITY`].
    pub fn apply(&self, session: &StoreSession<'_>) -> StoreResult<()> {
        for (topic_id, messages) in group_by_topic(&self.events) {
            let max_seen = session.topic_max_id(&topic_id)?;

            // Per-topic log order arrives ascending; duplicates from producer
            // retries or replays are not.
            let mut fresh: Vec<Message> = Vec::with_capacity(messages.len());
            for msg in messages {
                let replayed = max_seen.as_ref().is_some_and(|max| msg.id <= *max);
                let out_of_order = fresh.last().is_some_and(|last: &Message| msg.id <= last.id);
                if replayed || out_of_order {
                    debug!(topic_id = %topic_id, message_id = %msg.id, "skipping already-materialised message");
                    continue;
                }
                fresh.push(msg);
            }

            if fresh.is_empty() {
                continue;
            }
            let mut fresh = fresh.into_iter();

            if let Some(mut open) = session.find_open_bucket(&topic_id)? {
                let room = BUCKET_CAPACITY - open.size();
                open.append(fresh.by_ref().take(room));
                session.replace_bucket(&open)?;
            }

            let rest: Vec<Message> = fresh.collect();
            for chunk in rest.chunks(BUCKET_CAPACITY) {
                let bucket = Bucket::build(topic_id.clone(), chunk.to_vec())?;
                session.insert_bucket(&bucket)?;
            }
        }
        Ok(())
    }
}

/// Accumulates `MessageDeleted` events and tombstones their targets.
#[derive(Default)]
pub struct DeletedHandler {
    events: Vec<MessageDeleted>,
}

impl DeletedHandler {
    pub fn record(&mut self, event: MessageDeleted) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Tombstones each target. A target the store has never seen is
    /// [`StoreError::MessageNotFound`], fatal for this transaction attempt;
    /// an already-deleted target is a no-op (the replay case).
    pub fn apply(&self, session: &StoreSession<'_>) -> StoreResult<()> {
        for event in &self.events {
            match session.tombstone(&event.topic_id, &event.message_id)? {
                TombstoneOutcome::Applied => {}
                TombstoneOutcome::AlreadyDeleted => {
                    debug!(
                        topic_id = %event.topic_id,
                        message_id = %event.message_id,
                        "duplicate delete, already tombstoned"
                    );
                }
            }
        }
        Ok(())
    }
}

fn group_by_topic(events: &[MessageInserted]) -> Vec<(TopicId, Vec<Message>)> {
    let mut order: Vec<TopicId> = Vec::new();
    let mut groups: HashMap<TopicId, Vec<Message>> = HashMap::new();

    for event in events {
        let topic = event.msg.topic_id.clone();
        if !groups.contains_key(&topic) {
            order.push(topic.clone());
        }
        groups.entry(topic).or_default().push(event.msg.clone());
    }

    order
        .into_iter()
        .map(|topic| {
            let messages = groups.remove(&topic).unwrap_or_default();
            (topic, messages)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_bucket_store::{BucketStore, StoreError};
    use chat_event_log::Event;
    use chrono::Utc;

    fn msg(topic: &str, id: &str) -> Message {
        Message {
            sender_id: "u1".into(),
            id: id.into(),
            version: 1,
            topic_id: topic.into(),
            sent_at: Utc::now(),
            text: "hi".into(),
            deleted: false,
        }
    }

    fn inserted(msg: Message) -> MessageInserted {
        match Event::inserted(msg) {
            Event::Inserted(e) => e,
            _ => unreachable!(),
        }
    }

    fn deleted(msg: &Message) -> MessageDeleted {
        match Event::deleted(msg) {
            Event::Deleted(e) => e,
            _ => unreachable!(),
        }
    }

    fn apply_inserts(store: &BucketStore, messages: Vec<Message>) {
        let mut handler = InsertedHandler::default();
        for m in messages {
            handler.record(inserted(m));
        }
        store.with_session(|s| handler.apply(s)).unwrap();
    }

    fn sizes(store: &BucketStore, topic: &str) -> Vec<usize> {
        store
            .buckets_for_topic(&topic.into())
            .unwrap()
            .iter()
            .map(|b| b.size())
            .collect()
    }

    #[test]
    fn fills_open_bucket_then_spills() {
        let store = BucketStore::in_memory().unwrap();

        // 21 messages in one batch: a full bucket plus one.
        let messages: Vec<Message> = (0..21).map(|i| msg("t", &format!("m{i:02}"))).collect();
        apply_inserts(&store, messages);
        assert_eq!(sizes(&store, "t"), vec![20, 1]);

        // 5 more: the open bucket grows before any new bucket appears.
        let more: Vec<Message> = (21..26).map(|i| msg("t", &format!("m{i:02}"))).collect();
        apply_inserts(&store, more);
        assert_eq!(sizes(&store, "t"), vec![20, 6]);
    }

    #[test]
    fn at_most_one_open_bucket_per_topic() {
        let store = BucketStore::in_memory().unwrap();

        let messages: Vec<Message> = (0..65).map(|i| msg("t", &format!("m{i:02}"))).collect();
        apply_inserts(&store, messages);

        let open: Vec<usize> = sizes(&store, "t")
            .into_iter()
            .filter(|s| *s < BUCKET_CAPACITY)
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(sizes(&store, "t"), vec![20, 20, 20, 5]);
    }

    #[test]
    fn topics_do_not_share_buckets() {
        let store = BucketStore::in_memory().unwrap();

        apply_inserts(&store, vec![msg("a", "m1"), msg("b", "m2"), msg("a", "m3")]);

        assert_eq!(sizes(&store, "a"), vec![2]);
        assert_eq!(sizes(&store, "b"), vec![1]);
    }

    #[test]
    fn replayed_inserts_are_skipped() {
        let store = BucketStore::in_memory().unwrap();
        let messages: Vec<Message> = (0..3).map(|i| msg("t", &format!("m{i}"))).collect();

        apply_inserts(&store, messages.clone());
        // The whole batch redelivered, plus one genuinely new message.
        let mut replay = messages;
        replay.push(msg("t", "m9"));
        apply_inserts(&store, replay);

        assert_eq!(sizes(&store, "t"), vec![4]);
    }

    #[test]
    fn duplicate_ids_within_a_batch_collapse() {
        let store = BucketStore::in_memory().unwrap();

        apply_inserts(
            &store,
            vec![msg("t", "m1"), msg("t", "m1"), msg("t", "m2")],
        );
        assert_eq!(sizes(&store, "t"), vec![2]);
    }

    #[test]
    fn delete_tombstones_and_bumps_version() {
        let store = BucketStore::in_memory().unwrap();
        let target = msg("t", "m1");
        apply_inserts(&store, vec![target.clone(), msg("t", "m2")]);

        let mut handler = DeletedHandler::default();
        handler.record(deleted(&target));
        store.with_session(|s| handler.apply(s)).unwrap();

        let bucket = &store.buckets_for_topic(&"t".into()).unwrap()[0];
        assert!(bucket.messages[0].deleted);
        assert_eq!(bucket.messages[0].version, 2);
        assert!(!bucket.messages[1].deleted);

        // Replay: same observable state, no extra version bump.
        let mut replay = DeletedHandler::default();
        replay.record(deleted(&target));
        store.with_session(|s| replay.apply(s)).unwrap();

        let bucket = &store.buckets_for_topic(&"t".into()).unwrap()[0];
        assert_eq!(bucket.messages[0].version, 2);
    }

    #[test]
    fn delete_of_unknown_message_fails_the_transaction() {
        let store = BucketStore::in_memory().unwrap();
        apply_inserts(&store, vec![msg("t", "m1")]);

        let mut handler = DeletedHandler::default();
        let phantom = msg("t", "zz");
        handler.record(deleted(&phantom));

        let result = store.with_session(|s| handler.apply(s));
        assert!(matches!(result, Err(StoreError::MessageNotFound { .. })));
    }

    #[test]
    fn groups_preserve_arrival_order() {
        let events: Vec<MessageInserted> = vec![
            inserted(msg("b", "m1")),
            inserted(msg("a", "m2")),
            inserted(msg("b", "m3")),
        ];
        let grouped = group_by_topic(&events);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "b".into());
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, "a".into());
    }
}

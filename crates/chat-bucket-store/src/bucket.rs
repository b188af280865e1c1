//! The bucket document.

use chat_core::{Message, MessageId, TopicId};

use crate::error::{StoreError, StoreResult};

/// Messages per bucket.
pub const BUCKET_CAPACITY: usize = 20;

/// A group of up to [`BUCKET_CAPACITY`] messages for one topic.
///
/// Invariants: `messages` is ascending by id and every entry carries the
/// bucket's `topic_id`; `min_id`/`max_id` mirror the first and last entries;
/// `(topic_id, min_id)` is unique across the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub bucket_id: String,
    pub topic_id: TopicId,
    pub min_id: MessageId,
    pub max_id: MessageId,
    pub messages: Vec<Message>,
}

impl Bucket {
    /// Builds a bucket over `messages`, which must be non-empty, ascending
    /// by id and all of `topic_id`.
    pub fn build(topic_id: TopicId, messages: Vec<Message>) -> StoreResult<Self> {
        let (first, last) = match (messages.first(), messages.last()) {
            (Some(f), Some(l)) => (f.id.clone(), l.id.clone()),
            _ => {
                return Err(StoreError::InvalidBucket(
                    "bucket must hold at least one message".into(),
                ))
            }
        };

        if messages.iter().any(|m| m.topic_id != topic_id) {
            return Err(StoreError::InvalidBucket(format!(
                "bucket for topic '{topic_id}' given a message of another topic"
            )));
        }
        if messages.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(StoreError::InvalidBucket(
                "bucket messages must be strictly ascending by id".into(),
            ));
        }

        Ok(Self {
            bucket_id: uuid::Uuid::new_v4().to_string(),
            topic_id,
            min_id: first,
            max_id: last,
            messages,
        })
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    /// True while the bucket can still take messages.
    pub fn is_open(&self) -> bool {
        self.messages.len() < BUCKET_CAPACITY
    }

    /// Appends `messages` (ascending, ids greater than `max_id`) and fixes
    /// up `max_id`.
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        if let Some(last) = self.messages.last() {
            self.max_id = last.id.clone();
        }
    }
}

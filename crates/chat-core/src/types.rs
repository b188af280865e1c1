//! Identifiers and the message record.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_string {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wraps an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the id is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_string!(
    /// A durable conversation identifier; the unit of log partitioning and
    /// room identity.
    TopicId
);

id_string!(
    /// The authenticated subject of a request.
    UserId
);

id_string!(
    /// Identifies one open socket. Unique for the lifetime of the socket; a
    /// user may hold several at once.
    ClientId
);

id_string!(
    /// Message identifier, minted by the producer. Lexicographic order is id
    /// order (see [`MessageId::generate`]).
    MessageId
);

static PROCESS_ENTROPY: OnceLock<[u8; 5]> = OnceLock::new();
static ID_COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl MessageId {
    /// Mints a new id: 4 bytes of big-endian unix seconds, 5 bytes of
    /// per-process entropy, a 3-byte wrapping counter, hex encoded (24
    /// chars). Monotonic within one producer process, which combined with
    /// per-topic partitioning gives monotonic ids per partition.
    pub fn generate() -> Self {
        let seconds = Utc::now().timestamp().max(0) as u32;
        let entropy = PROCESS_ENTROPY.get_or_init(rand::random);
        let counter =
            ID_COUNTER.get_or_init(|| AtomicU32::new(rand::random::<u32>() & 0x003f_ffff));
        let count = counter.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut raw = [0u8; 12];
        raw[0..4].copy_from_slice(&seconds.to_be_bytes());
        raw[4..9].copy_from_slice(entropy);
        raw[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);

        let mut out = String::with_capacity(24);
        for b in raw {
            out.push_str(&format!("{b:02x}"));
        }
        Self(out)
    }
}

/// A chat message.
///
/// Immutable after production except for `version` and `deleted`, which only
/// the sink mutates when it replays a later event. Never physically deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: UserId,
    pub id: MessageId,
    #[serde(rename = "v")]
    pub version: u32,
    pub topic_id: TopicId,
    pub sent_at: DateTime<Utc>,
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl Message {
    /// Builds a fresh message at version 1 with a newly minted id and the
    /// current wall clock.
    pub fn new(sender_id: UserId, topic_id: TopicId, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            id: MessageId::generate(),
            version: 1,
            topic_id,
            sent_at: Utc::now(),
            text: text.into(),
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_json_field_names() {
        let msg = Message {
            sender_id: "u1".into(),
            id: "m1".into(),
            version: 1,
            topic_id: "t1".into(),
            sent_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            text: "hi".into(),
            deleted: false,
        };

        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["id"], "m1");
        assert_eq!(value["v"], 1);
        assert_eq!(value["topicId"], "t1");
        assert_eq!(value["sentAt"], "2024-05-01T12:00:00Z");
        assert_eq!(value["text"], "hi");
        // Tombstone flag is omitted until set.
        assert!(value.get("deleted").is_none());
    }

    #[test]
    fn message_json_round_trip() {
        let mut msg = Message::new("u1".into(), "t1".into(), "hello");
        msg.deleted = true;
        msg.version = 2;

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn generated_ids_are_monotonic_and_unique() {
        let ids: Vec<MessageId> = (0..1000).map(|_| MessageId::generate()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(ids[0].as_str().len(), 24);
    }
}

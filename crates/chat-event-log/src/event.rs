//! Typed message events and their wire codec.

use chat_core::{Message, MessageId, TopicId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Record header carrying the event-type tag.
pub const EVENT_TYPE_HEADER: &str = "eventType";

/// Codec failures. All of these are fatal for the record (and, in the sink,
/// for the batch).
#[derive(Error, Debug)]
pub enum CodecError {
    /// The record carried no `eventType` header.
    #[error("record has no {EVENT_TYPE_HEADER} header")]
    MissingHeader,

    /// The header value is not a recognised tag.
    #[error("invalid event type {0:?}")]
    UnknownEventType(String),

    /// The payload did not parse as the variant the tag names.
    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The recognised event-type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    MessageInserted,
    MessageDeleted,
}

impl EventType {
    /// Parses a raw header value. Anything but the recognised tags (or
    /// anything implausibly short) is rejected, before any payload work.
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < 3 {
            return Err(CodecError::UnknownEventType(
                String::from_utf8_lossy(raw).into_owned(),
            ));
        }
        match raw {
            b"message.inserted.v1" => Ok(Self::MessageInserted),
            b"message.deleted.v1" => Ok(Self::MessageDeleted),
            other => Err(CodecError::UnknownEventType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageInserted => "message.inserted.v1",
            Self::MessageDeleted => "message.deleted.v1",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Fresh unique identifier carried by every event, for idempotency
/// diagnostics.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A new message was produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageInserted {
    pub event_id: EventId,
    pub event_type: EventType,
    pub msg: Message,
}

/// A message was tombstoned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub event_id: EventId,
    pub event_type: EventType,
    pub topic_id: TopicId,
    pub message_id: MessageId,
    pub message_version: u32,
    pub deleted_at: DateTime<Utc>,
}

/// A message event. The partition key is always the topic id, which gives
/// per-topic total order and only partial order across topics.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Inserted(MessageInserted),
    Deleted(MessageDeleted),
}

impl Event {
    /// Wraps a freshly produced message.
    pub fn inserted(msg: Message) -> Self {
        Self::Inserted(MessageInserted {
            event_id: EventId::new(),
            event_type: EventType::MessageInserted,
            msg,
        })
    }

    /// Tombstone event for `msg`.
    pub fn deleted(msg: &Message) -> Self {
        Self::Deleted(MessageDeleted {
            event_id: EventId::new(),
            event_type: EventType::MessageDeleted,
            topic_id: msg.topic_id.clone(),
            message_id: msg.id.clone(),
            message_version: msg.version,
            deleted_at: Utc::now(),
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Inserted(_) => EventType::MessageInserted,
            Self::Deleted(_) => EventType::MessageDeleted,
        }
    }

    pub fn event_id(&self) -> &EventId {
        match self {
            Self::Inserted(e) => &e.event_id,
            Self::Deleted(e) => &e.event_id,
        }
    }

    /// The partition key.
    pub fn topic_id(&self) -> &TopicId {
        match self {
            Self::Inserted(e) => &e.msg.topic_id,
            Self::Deleted(e) => &e.topic_id,
        }
    }

    /// Serialises the payload (the header travels separately).
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = match self {
            Self::Inserted(e) => serde_json::to_vec(e)?,
            Self::Deleted(e) => serde_json::to_vec(e)?,
        };
        Ok(bytes)
    }

    /// Header-first decode: the tag is validated before the payload is
    /// parsed, so malformed or unrecognised records cost nothing.
    pub fn decode(header: Option<&[u8]>, payload: &[u8]) -> Result<Self, CodecError> {
        let tag = EventType::parse(header.ok_or(CodecError::MissingHeader)?)?;
        match tag {
            EventType::MessageInserted => Ok(Self::Inserted(serde_json::from_slice(payload)?)),
            EventType::MessageDeleted => Ok(Self::Deleted(serde_json::from_slice(payload)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message::new("u1".into(), "t1".into(), "hello")
    }

    #[test]
    fn event_type_parse_accepts_known_tags_only() {
        assert_eq!(
            EventType::parse(b"message.inserted.v1").unwrap(),
            EventType::MessageInserted
        );
        assert_eq!(
            EventType::parse(b"message.deleted.v1").unwrap(),
            EventType::MessageDeleted
        );
        assert!(EventType::parse(b"message.edited.v1").is_err());
        assert!(EventType::parse(b"").is_err());
        assert!(EventType::parse(b"ab").is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let inserted = Event::inserted(sample_message());
        let payload = inserted.encode().unwrap();
        let decoded = Event::decode(Some(b"message.inserted.v1"), &payload).unwrap();
        assert_eq!(inserted, decoded);

        let deleted = Event::deleted(&sample_message());
        let payload = deleted.encode().unwrap();
        let decoded = Event::decode(Some(b"message.deleted.v1"), &payload).unwrap();
        assert_eq!(deleted, decoded);
    }

    #[test]
    fn decode_is_header_first() {
        let payload = Event::inserted(sample_message()).encode().unwrap();

        assert!(matches!(
            Event::decode(None, &payload),
            Err(CodecError::MissingHeader)
        ));
        assert!(matches!(
            Event::decode(Some(b"message.edited.v1"), &payload),
            Err(CodecError::UnknownEventType(_))
        ));
        // A good header with a broken payload fails at the payload step.
        assert!(matches!(
            Event::decode(Some(b"message.inserted.v1"), b"{not json"),
            Err(CodecError::Payload(_))
        ));
    }

    #[test]
    fn inserted_payload_shape() {
        let event = Event::inserted(sample_message());
        let value: serde_json::Value =
            serde_json::from_slice(&event.encode().unwrap()).unwrap();

        assert_eq!(value["event_type"], "message.inserted.v1");
        assert!(value["event_id"].is_string());
        assert_eq!(value["msg"]["topicId"], "t1");
    }

    #[test]
    fn deleted_payload_shape() {
        let event = Event::deleted(&sample_message());
        let value: serde_json::Value =
            serde_json::from_slice(&event.encode().unwrap()).unwrap();

        assert_eq!(value["event_type"], "message.deleted.v1");
        assert_eq!(value["topic_id"], "t1");
        assert!(value["message_id"].is_string());
        assert_eq!(value["message_version"], 1);
        assert!(value["deleted_at"].is_string());
    }
}

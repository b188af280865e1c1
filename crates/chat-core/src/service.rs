//! The message service: validation, authorization, repository dispatch.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::pagination::Pagination;
use crate::types::{Message, TopicId, UserId};

/// Longest accepted message text, in bytes.
pub const MAX_TEXT_BYTES: usize = 300;

/// Answers "does `user` hold `relation` on the object?".
///
/// Backed by the remote relation-tuple oracle; implementations must
/// propagate cancellation from the caller's task.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool>;
}

/// Storage seam for messages: reads come from the bucketed store, writes go
/// to the event log.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Range query over materialised messages, ascending by id, tombstones
    /// excluded.
    async fn list_messages(&self, topic_id: &TopicId, page: &Pagination)
        -> CoreResult<Vec<Message>>;

    /// Publishes a `MessageInserted` event and returns the synthesised
    /// message without waiting for materialisation.
    async fn send_to_topic(
        &self,
        sender: &UserId,
        topic_id: &TopicId,
        text: &str,
    ) -> CoreResult<Message>;

    /// Publishes a `MessageDeleted` event. Idempotent: re-publishing for an
    /// already-deleted id changes nothing downstream.
    async fn delete_message(&self, msg: &Message) -> CoreResult<()>;
}

/// Front door for message operations.
pub struct MessageService<R, A> {
    repo: R,
    authz: A,
}

impl<R: MessageRepository, A: PermissionChecker> MessageService<R, A> {
    pub fn new(repo: R, authz: A) -> Self {
        Self { repo, authz }
    }

    /// Lists messages the user may read in `topic_id`, within `page`.
    pub async fn list_messages(
        &self,
        user_id: &UserId,
        topic_id: &TopicId,
        page: &Pagination,
    ) -> CoreResult<Vec<Message>> {
        if topic_id.is_empty() {
            return Err(CoreError::InvalidArgument("topicId is empty".into()));
        }

        self.require(user_id, "read", topic_id).await?;
        self.repo.list_messages(topic_id, page).await
    }

    /// Accepts a new message for `topic_id` and returns it as produced.
    pub async fn send_message(
        &self,
        user_id: &UserId,
        topic_id: &TopicId,
        text: &str,
    ) -> CoreResult<Message> {
        if topic_id.is_empty() {
            return Err(CoreError::InvalidArgument("topicId is empty".into()));
        }
        if text.is_empty() {
            return Err(CoreError::InvalidArgument("message is empty".into()));
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(CoreError::InvalidArgument(format!(
                "message exceeds {MAX_TEXT_BYTES} bytes"
            )));
        }

        self.require(user_id, "write", topic_id).await?;

        let msg = self.repo.send_to_topic(user_id, topic_id, text).await?;
        debug!(topic_id = %topic_id, message_id = %msg.id, "message accepted");
        Ok(msg)
    }

    /// Marks a message deleted. Safe to repeat for the same id.
    pub async fn delete_message(&self, user_id: &UserId, msg: &Message) -> CoreResult<()> {
        if msg.id.is_empty() || msg.topic_id.is_empty() {
            return Err(CoreError::InvalidArgument("message id or topic is empty".into()));
        }

        self.require(user_id, "delete", &msg.topic_id).await?;
        self.repo.delete_message(msg).await
    }

    async fn require(&self, user_id: &UserId, relation: &str, topic_id: &TopicId) -> CoreResult<()> {
        let allowed = self
            .authz
            .check(user_id, relation, "topic", topic_id.as_str())
            .await?;

        if !allowed {
            return Err(CoreError::NotAuthorized {
                subject: user_id.to_string(),
                resource_type: "topic",
                resource_id: topic_id.to_string(),
            });
        }
        Ok(())
    }
}

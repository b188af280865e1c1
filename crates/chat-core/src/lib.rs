//! Core domain model for the chat backend.
//!
//! This crate holds the types shared by every service (ids, [`Message`],
//! [`Pagination`]) and the message service, which owns validation and
//! authorization before dispatching to a repository.
//!
//! The repository and the permission checker are trait seams: the HTTP API
//! talks to [`MessageService`], which talks to whatever backs the log and
//! the store.

mod error;
mod pagination;
mod service;
mod types;

pub use error::{CoreError, CoreResult};
pub use pagination::{Pagination, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use service::{MessageRepository, MessageService, PermissionChecker, MAX_TEXT_BYTES};
pub use types::{ClientId, Message, MessageId, TopicId, UserId};

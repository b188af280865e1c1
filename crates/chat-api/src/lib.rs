//! The HTTP message API.
//!
//! Two endpoints over the message service: `POST
//! /topics/{TopicID}/messages` accepts a message, `GET` paginates the
//! materialised log. Validation failures are 422, authorization denials
//! 403; the subject comes from the `userId` cookie.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{router, ApiState};

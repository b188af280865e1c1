//! Domain errors.

use thiserror::Error;

/// Core error type, shared by the service and its trait seams.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The subject does not hold the required relation on the resource.
    #[error("subject {subject} can not access {resource_type} with id {resource_id}")]
    NotAuthorized {
        subject: String,
        resource_type: &'static str,
        resource_id: String,
    },

    /// A referenced entity does not exist.
    #[error("{kind} with id '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The authorization oracle could not be queried.
    #[error("authorization backend error: {0}")]
    Authz(String),

    /// The repository (log or store) failed.
    #[error("repository error: {0}")]
    Repository(String),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

//! Adapter over the remote relation-tuple oracle.
//!
//! Three queries, specified at the contract boundary: `check(subject, verb,
//! object)`, `who_has_relation(verb, object) → subjects`, and
//! `which_objects_relate_to_subject(subject, verb, type) → objects`. The
//! oracle's own schema is out of scope; this crate only speaks its HTTP
//! surface.
//!
//! [`StaticAuthz`] is the in-memory stand-in for tests and local runs.

mod client;
mod statics;

use async_trait::async_trait;
use chat_core::{CoreResult, UserId};

pub use client::{AuthzClient, AuthzConfig};
pub use statics::StaticAuthz;

/// The oracle's three queries, as a seam so servers can run against the
/// HTTP client or an in-memory stand-in.
#[async_trait]
pub trait RelationOracle: Send + Sync {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool>;

    async fn who_has_relation(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<Vec<UserId>>;

    async fn which_objects_relate_to_subject(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
    ) -> CoreResult<Vec<String>>;
}

#[async_trait]
impl RelationOracle for AuthzClient {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool> {
        AuthzClient::check(self, user_id, relation, object_type, object_id).await
    }

    async fn who_has_relation(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<Vec<UserId>> {
        AuthzClient::who_has_relation(self, relation, object_type, object_id).await
    }

    async fn which_objects_relate_to_subject(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
    ) -> CoreResult<Vec<String>> {
        AuthzClient::which_objects_relate_to_subject(self, user_id, relation, object_type).await
    }
}

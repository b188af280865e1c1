//! In-memory oracle for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chat_core::{CoreResult, PermissionChecker, UserId};

use crate::RelationOracle;

type Grant = (String, String, String); // (user, relation, object)

/// A configurable in-memory relation store. Grants are exact
/// `(user, relation, object)` tuples on one object type ("topic" in
/// practice, the type is not stored).
#[derive(Default)]
pub struct StaticAuthz {
    grants: RwLock<HashSet<Grant>>,
}

impl StaticAuthz {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `relation` on `object_id` to `user_id`.
    pub fn allow(&self, user_id: &str, relation: &str, object_id: &str) {
        self.grants.write().unwrap().insert((
            user_id.to_string(),
            relation.to_string(),
            object_id.to_string(),
        ));
    }

    /// Convenience: grants read+write+watch+delete on `object_id`.
    pub fn allow_all(&self, user_id: &str, object_id: &str) {
        for relation in ["read", "write", "watch", "delete"] {
            self.allow(user_id, relation, object_id);
        }
    }

    /// Revokes every grant the user holds on `object_id`.
    pub fn revoke(&self, user_id: &str, object_id: &str) {
        self.grants
            .write()
            .unwrap()
            .retain(|(u, _, o)| !(u == user_id && o == object_id));
    }
}

#[async_trait]
impl RelationOracle for StaticAuthz {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        _object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool> {
        Ok(self.grants.read().unwrap().contains(&(
            user_id.to_string(),
            relation.to_string(),
            object_id.to_string(),
        )))
    }

    async fn who_has_relation(
        &self,
        relation: &str,
        _object_type: &str,
        object_id: &str,
    ) -> CoreResult<Vec<UserId>> {
        let mut users: Vec<String> = self
            .grants
            .read()
            .unwrap()
            .iter()
            .filter(|(_, r, o)| r == relation && o == object_id)
            .map(|(u, _, _)| u.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users.into_iter().map(UserId::from).collect())
    }

    async fn which_objects_relate_to_subject(
        &self,
        user_id: &UserId,
        relation: &str,
        _object_type: &str,
    ) -> CoreResult<Vec<String>> {
        let mut objects: Vec<String> = self
            .grants
            .read()
            .unwrap()
            .iter()
            .filter(|(u, r, _)| u == user_id.as_str() && r == relation)
            .map(|(_, _, o)| o.clone())
            .collect();
        objects.sort();
        objects.dedup();
        Ok(objects)
    }
}

#[async_trait]
impl PermissionChecker for StaticAuthz {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool> {
        RelationOracle::check(self, user_id, relation, object_type, object_id).await
    }
}

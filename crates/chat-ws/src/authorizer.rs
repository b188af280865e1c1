//! Watch-relation adapter: oracle queries shaped for the room server.

use async_trait::async_trait;
use chat_authz::RelationOracle;
use chat_core::{CoreResult, TopicId, UserId};
use chat_rooms::WatchAuthorizer;

const WATCH_RELATION: &str = "watch";
const TOPIC_TYPE: &str = "topic";

/// Answers the room server's two membership questions through the oracle.
pub struct WsAuthorizer<O> {
    oracle: O,
}

impl<O: RelationOracle> WsAuthorizer<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl<O: RelationOracle> WatchAuthorizer for WsAuthorizer<O> {
    async fn who_can_watch(&self, topic_id: &TopicId) -> CoreResult<Vec<UserId>> {
        self.oracle
            .who_has_relation(WATCH_RELATION, TOPIC_TYPE, topic_id.as_str())
            .await
    }

    /// The oracle returns everything the user may watch; the result is the
    /// sorted intersection with the candidate list (the rooms that
    /// currently exist).
    async fn topics_user_can_watch(
        &self,
        user_id: &UserId,
        candidates: Vec<TopicId>,
    ) -> CoreResult<Vec<TopicId>> {
        let mut authorized = self
            .oracle
            .which_objects_relate_to_subject(user_id, WATCH_RELATION, TOPIC_TYPE)
            .await?;
        authorized.sort();

        let mut candidates: Vec<String> =
            candidates.into_iter().map(|t| t.0).collect();
        candidates.sort();

        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < authorized.len() && j < candidates.len() {
            match authorized[i].cmp(&candidates[j]) {
                std::cmp::Ordering::Equal => {
                    result.push(TopicId::from(std::mem::take(&mut candidates[j])));
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_authz::StaticAuthz;

    #[tokio::test]
    async fn who_can_watch_queries_the_watch_relation() {
        let oracle = StaticAuthz::new();
        oracle.allow("u1", "watch", "t1");
        oracle.allow("u2", "read", "t1");

        let authorizer = WsAuthorizer::new(oracle);
        let watchers = authorizer.who_can_watch(&"t1".into()).await.unwrap();
        assert_eq!(watchers, vec![UserId::from("u1")]);
    }

    #[tokio::test]
    async fn topics_are_intersected_with_candidates() {
        let oracle = StaticAuthz::new();
        for topic in ["a", "c", "e"] {
            oracle.allow("u1", "watch", topic);
        }

        let authorizer = WsAuthorizer::new(oracle);
        let candidates: Vec<TopicId> = ["e", "b", "a", "d"].map(TopicId::from).to_vec();
        let topics = authorizer
            .topics_user_can_watch(&"u1".into(), candidates)
            .await
            .unwrap();

        assert_eq!(topics, vec![TopicId::from("a"), TopicId::from("e")]);
    }

    #[tokio::test]
    async fn no_grants_means_no_topics() {
        let authorizer = WsAuthorizer::new(StaticAuthz::new());
        let topics = authorizer
            .topics_user_can_watch(&"u1".into(), vec!["a".into()])
            .await
            .unwrap();
        assert!(topics.is_empty());
    }
}

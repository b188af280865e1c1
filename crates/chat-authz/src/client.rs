//! HTTP client for the relation-tuple oracle.

use std::time::Duration;

use async_trait::async_trait;
use chat_core::{CoreError, CoreResult, PermissionChecker, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SUBJECT_TYPE_USER: &str = "user";
const HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";

/// Oracle endpoint configuration.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// Base URL of the oracle's HTTP API (e.g. `http://localhost:8443`).
    pub api_url: String,
    /// Bearer token presented on every request.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AuthzConfig {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// The oracle client. Cheap to clone. Requests inherit the caller's
/// cancellation: dropping the future aborts the round-trip.
#[derive(Clone)]
pub struct AuthzClient {
    config: AuthzConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectRef<'a> {
    object_type: &'a str,
    object_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRef<'a> {
    object: ObjectRef<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequest<'a> {
    resource: ObjectRef<'a>,
    permission: &'a str,
    subject: SubjectRef<'a>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    permissionship: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupSubjectsRequest<'a> {
    resource: ObjectRef<'a>,
    permission: &'a str,
    subject_object_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupResourcesRequest<'a> {
    subject: SubjectRef<'a>,
    permission: &'a str,
    resource_object_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamItem<T> {
    result: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectResult {
    subject: SubjectIdHolder,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectIdHolder {
    subject_object_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceResult {
    resource_object_id: String,
}

impl AuthzClient {
    pub fn new(config: AuthzConfig) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Authz(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Does `user_id` hold `relation` on `(object_type, object_id)`?
    pub async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool> {
        let request = CheckRequest {
            resource: ObjectRef {
                object_type,
                object_id,
            },
            permission: relation,
            subject: SubjectRef {
                object: ObjectRef {
                    object_type: SUBJECT_TYPE_USER,
                    object_id: user_id.as_str(),
                },
            },
        };

        let response: CheckResponse = self
            .post_json("/v1/permissions/check", &request)
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Authz(e.to_string()))?;

        let allowed = response.permissionship == HAS_PERMISSION;
        debug!(user_id = %user_id, relation, object_type, object_id, allowed, "permission checked");
        Ok(allowed)
    }

    /// Every subject holding `relation` on `(object_type, object_id)`.
    pub async fn who_has_relation(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<Vec<UserId>> {
        let request = LookupSubjectsRequest {
            resource: ObjectRef {
                object_type,
                object_id,
            },
            permission: relation,
            subject_object_type: SUBJECT_TYPE_USER,
        };

        let body = self
            .post_json("/v1/permissions/subjects", &request)
            .await?
            .text()
            .await
            .map_err(|e| CoreError::Authz(e.to_string()))?;

        let mut subjects = Vec::new();
        for item in parse_stream::<SubjectResult>(&body)? {
            subjects.push(UserId::from(item.subject.subject_object_id));
        }
        Ok(subjects)
    }

    /// Every object of `object_type` that `user_id` holds `relation` on.
    pub async fn which_objects_relate_to_subject(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
    ) -> CoreResult<Vec<String>> {
        let request = LookupResourcesRequest {
            subject: SubjectRef {
                object: ObjectRef {
                    object_type: SUBJECT_TYPE_USER,
                    object_id: user_id.as_str(),
                },
            },
            permission: relation,
            resource_object_type: object_type,
        };

        let body = self
            .post_json("/v1/permissions/resources", &request)
            .await?
            .text()
            .await
            .map_err(|e| CoreError::Authz(e.to_string()))?;

        let objects = parse_stream::<ResourceResult>(&body)?
            .into_iter()
            .map(|item| item.resource_object_id)
            .collect();
        Ok(objects)
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> CoreResult<reqwest::Response> {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::Authz(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Authz(format!(
                "oracle returned {} for {path}",
                response.status()
            )));
        }
        Ok(response)
    }
}

/// The oracle streams lookup results as one JSON object per line.
fn parse_stream<T: for<'de> Deserialize<'de>>(body: &str) -> CoreResult<Vec<T>> {
    let mut items = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let item: StreamItem<T> =
            serde_json::from_str(line).map_err(|e| CoreError::Authz(e.to_string()))?;
        if let Some(result) = item.result {
            items.push(result);
        }
    }
    Ok(items)
}

#[async_trait]
impl PermissionChecker for AuthzClient {
    async fn check(
        &self,
        user_id: &UserId,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> CoreResult<bool> {
        AuthzClient::check(self, user_id, relation, object_type, object_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_request_wire_shape() {
        let request = CheckRequest {
            resource: ObjectRef {
                object_type: "topic",
                object_id: "t1",
            },
            permission: "write",
            subject: SubjectRef {
                object: ObjectRef {
                    object_type: "user",
                    object_id: "u1",
                },
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["resource"]["objectType"], "topic");
        assert_eq!(value["resource"]["objectId"], "t1");
        assert_eq!(value["permission"], "write");
        assert_eq!(value["subject"]["object"]["objectId"], "u1");
    }

    #[test]
    fn stream_parsing_skips_blank_lines_and_keepalives() {
        let body = r#"{"result":{"subject":{"subjectObjectId":"u1"}}}

{"result":{"subject":{"subjectObjectId":"u2"}}}
{"error":null}
"#;
        let items: Vec<SubjectResult> = parse_stream(body).unwrap();
        let ids: Vec<&str> = items
            .iter()
            .map(|i| i.subject.subject_object_id.as_str())
            .collect();
        assert_eq!(ids, ["u1", "u2"]);
    }

    #[test]
    fn permissionship_mapping() {
        let yes: CheckResponse = serde_json::from_str(
            r#"{"permissionship":"PERMISSIONSHIP_HAS_PERMISSION","checkedAt":{}}"#,
        )
        .unwrap();
        assert_eq!(yes.permissionship, HAS_PERMISSION);

        let no: CheckResponse =
            serde_json::from_str(r#"{"permissionship":"PERMISSIONSHIP_NO_PERMISSION"}"#).unwrap();
        assert_ne!(no.permissionship, HAS_PERMISSION);
    }
}

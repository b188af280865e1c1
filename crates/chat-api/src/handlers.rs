//! Route handlers and the router.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chat_bucket_store::BucketStore;
use chat_core::{
    Message, MessageRepository, MessageService, Pagination, PermissionChecker, TopicId, UserId,
    MAX_PAGE_LIMIT, MAX_TEXT_BYTES,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;

const MAX_ID_CHARS: usize = 30;

/// Shared state behind the router.
pub struct ApiState<R, A> {
    service: Arc<MessageService<R, A>>,
    store: BucketStore,
    /// Link prefix for prev/next, e.g. `http://127.0.0.1:8888`.
    base_url: String,
}

impl<R, A> Clone for ApiState<R, A> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            store: self.store.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl<R, A> ApiState<R, A> {
    pub fn new(service: MessageService<R, A>, store: BucketStore, base_url: impl Into<String>) -> Self {
        Self {
            service: Arc::new(service),
            store,
            base_url: base_url.into(),
        }
    }
}

/// Builds the API router.
pub fn router<R, A>(state: ApiState<R, A>) -> Router
where
    R: MessageRepository + 'static,
    A: PermissionChecker + 'static,
{
    Router::new()
        .route(
            "/topics/{topic_id}/messages",
            get(list_messages::<R, A>).post(send_message::<R, A>),
        )
        .route("/healthz", get(healthz::<R, A>))
        .with_state(state)
}

#[derive(Deserialize)]
struct SendBody {
    message: String,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    after_id: Option<String>,
    before_id: Option<String>,
}

#[derive(serde::Serialize)]
struct ListResponse {
    messages: Vec<Message>,
    prev: String,
    next: String,
}

async fn send_message<R: MessageRepository, A: PermissionChecker>(
    State(state): State<ApiState<R, A>>,
    Path(topic_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = subject(&headers)?;
    let topic_id = validated_topic(topic_id)?;

    if body.message.is_empty() || body.message.len() > MAX_TEXT_BYTES {
        return Err(ApiError::Validation(format!(
            "message length must be 1..={MAX_TEXT_BYTES} bytes"
        )));
    }

    let msg = state
        .service
        .send_message(&user_id, &topic_id, &body.message)
        .await?;
    debug!(topic_id = %topic_id, message_id = %msg.id, "message accepted over http");
    Ok((StatusCode::CREATED, Json(msg)))
}

async fn list_messages<R: MessageRepository, A: PermissionChecker>(
    State(state): State<ApiState<R, A>>,
    Path(topic_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let user_id = subject(&headers)?;
    let topic_id = validated_topic(topic_id)?;

    let limit = match query.limit {
        None => 0, // service default
        Some(n) if (1..=MAX_PAGE_LIMIT as i64).contains(&n) => n as usize,
        Some(n) => {
            return Err(ApiError::Validation(format!(
                "limit {n} outside 1..={MAX_PAGE_LIMIT}"
            )))
        }
    };
    let after_id = validated_cursor(query.after_id, "after_id")?;
    let before_id = validated_cursor(query.before_id, "before_id")?;

    let page = Pagination {
        after_id: after_id.clone().map(Into::into),
        before_id: before_id.clone().map(Into::into),
        limit,
    };
    let messages = state
        .service
        .list_messages(&user_id, &topic_id, &page)
        .await?;

    // Pagination links embed the outer-extreme ids of the page; an empty
    // page keeps the caller's cursor.
    let shown_limit = page.effective_limit();
    let (prev_after, prev_before, next_after, next_before) = match (messages.first(), messages.last())
    {
        (Some(first), Some(last)) => (
            None,
            Some(first.id.to_string()),
            Some(last.id.to_string()),
            None,
        ),
        _ => (
            after_id.clone(),
            before_id.clone(),
            after_id.clone(),
            before_id.clone(),
        ),
    };

    let response = ListResponse {
        prev: list_link(&state.base_url, &topic_id, shown_limit, prev_after, prev_before),
        next: list_link(&state.base_url, &topic_id, shown_limit, next_after, next_before),
        messages,
    };
    Ok(Json(response))
}

async fn healthz<R: MessageRepository, A: PermissionChecker>(
    State(state): State<ApiState<R, A>>,
) -> impl IntoResponse {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "degraded", "error": e.to_string()})),
        ),
    }
}

fn subject(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let cookies = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;

    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some("userId") {
            let value = parts.next().unwrap_or("").trim();
            if !value.is_empty() {
                return Ok(UserId::from(value));
            }
        }
    }
    Err(ApiError::Unauthenticated)
}

fn validated_topic(topic_id: String) -> Result<TopicId, ApiError> {
    if topic_id.is_empty() || topic_id.len() > MAX_ID_CHARS {
        return Err(ApiError::Validation(format!(
            "topic id length must be 1..={MAX_ID_CHARS}"
        )));
    }
    Ok(TopicId::from(topic_id))
}

fn validated_cursor(cursor: Option<String>, name: &str) -> Result<Option<String>, ApiError> {
    match cursor {
        Some(id) if id.len() > MAX_ID_CHARS => Err(ApiError::Validation(format!(
            "{name} longer than {MAX_ID_CHARS} chars"
        ))),
        Some(id) if id.is_empty() => Ok(None),
        other => Ok(other),
    }
}

fn list_link(
    base_url: &str,
    topic_id: &TopicId,
    limit: usize,
    after_id: Option<String>,
    before_id: Option<String>,
) -> String {
    let mut link = format!("{base_url}/topics/{topic_id}/messages?limit={limit}");
    if let Some(after) = after_id {
        link.push_str("&after_id=");
        link.push_str(&after);
    }
    if let Some(before) = before_id {
        link.push_str("&before_id=");
        link.push_str(&before);
    }
    link
}

//! Chat threads
//!
//! Stores the user side of the conversation. Assistant replies are appended
//! by the external chat worker through the same store.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diligence_tenant::{ChatMessage, ChatRole, ChatThread};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::required_text;
use crate::error::{ApiError, ApiJson, ApiResult, OrNotFound};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

const MAX_MESSAGE_CHARS: usize = 20_000;
const TITLE_CHARS: usize = 60;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/", get(get_chat).post(post_message))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChatQuery {
    /// Return this thread with its messages
    pub thread_id: Option<Uuid>,
    /// Limit the thread list to one company
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreadView {
    pub thread: ChatThread,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatPost {
    /// Existing thread; a new one is started when absent
    pub thread_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatPosted {
    pub thread: ChatThread,
    pub message: ChatMessage,
}

/// First line of the message, shortened
fn thread_title(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_CHARS).collect();
    title.push_str("...");
    title
}

#[utoipa::path(
    get,
    path = "/chat",
    params(ChatQuery),
    responses(
        (status = 200, description = "Thread with messages when `thread_id` is given, else the thread list", body = [ChatThread]),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn get_chat(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Query(query): Query<ChatQuery>,
) -> ApiResult<Response> {
    if let Some(thread_id) = query.thread_id {
        let thread = state.store.get_thread(ctx.org_id(), thread_id).await?.or_not_found()?;
        let messages = state.store.list_messages(ctx.org_id(), thread_id).await?;
        return Ok(Json(ThreadView { thread, messages }).into_response());
    }

    let threads = state.store.list_threads(ctx.org_id(), query.company_id).await?;
    Ok(Json(threads).into_response())
}

#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatPost,
    responses(
        (status = 201, description = "Message stored", body = ChatPosted),
        (status = 400, description = "Empty message", body = ErrorResponse),
        (status = 404, description = "Unknown thread or company", body = ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn post_message(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    ApiJson(input): ApiJson<ChatPost>,
) -> ApiResult<(StatusCode, Json<ChatPosted>)> {
    ctx.require(Permission::DealsWrite)?;
    let content = required_text("content", &input.content, MAX_MESSAGE_CHARS)?;
    let now = Utc::now();

    let thread = match input.thread_id {
        Some(thread_id) => {
            let thread = state.store.get_thread(ctx.org_id(), thread_id).await?.or_not_found()?;
            if input.company_id.is_some_and(|c| thread.company_id != Some(c)) {
                return Err(ApiError::bad_request("company_id does not match the thread"));
            }
            thread
        }
        None => {
            if let Some(company_id) = input.company_id {
                state.store.get_company(ctx.org_id(), company_id).await?.or_not_found()?;
            }
            let thread = ChatThread {
                id: Uuid::new_v4(),
                org_id: ctx.org_id(),
                company_id: input.company_id,
                title: thread_title(&content),
                created_by: ctx.user.id,
                created_at: now,
            };
            state.store.create_thread(thread).await?
        }
    };

    let message = state
        .store
        .append_message(ChatMessage {
            id: Uuid::new_v4(),
            org_id: ctx.org_id(),
            thread_id: thread.id,
            role: ChatRole::User,
            author_id: Some(ctx.user.id),
            content,
            created_at: now,
        })
        .await?;

    tracing::debug!(org_id = %ctx.org_id(), thread_id = %thread.id, "chat message stored");
    Ok((StatusCode::CREATED, Json(ChatPosted { thread, message })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_title() {
        assert_eq!(thread_title("What is the burn rate?\nAlso runway"), "What is the burn rate?");
        let long = "a".repeat(80);
        let title = thread_title(&long);
        assert_eq!(title.chars().count(), TITLE_CHARS + 3);
        assert!(title.ends_with("..."));
    }
}

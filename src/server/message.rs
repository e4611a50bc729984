//! Message routes.

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::error::{ok, ok_message, ApiError, ApiResult};
use super::chat::MAX_CONTENT_CHARS;
use super::extract::{owned_chat, ApiJson, ApiQuery, AuthUser};
use super::AppState;
use crate::events::ChatEventKind;
use crate::store::{Role, DEFAULT_CHAT_TITLE};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    #[serde(default)]
    id: Option<String>,
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    id: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let chat_id = query
        .chat_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing chat id".to_string()))?;
    let chat = owned_chat(&state, &user, &chat_id).await?;

    let list = state.store.list_messages(&chat.id).await?;
    Ok(ok(json!({ "list": list })))
}

pub async fn update_message(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<UpdateBody>,
) -> ApiResult<impl IntoResponse> {
    if body.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }

    let id = body.id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    if let Some(id) = id {
        // An existing message may only be rewritten by the owner of its chat.
        if let Some(existing) = state.store.find_message(id).await? {
            owned_chat(&state, &user, &existing.chat_id).await?;
        }
    }

    let chat_id = match body.chat_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(chat_id) => {
            let chat = owned_chat(&state, &user, chat_id).await?;
            state.store.touch_chat(&chat.id).await?;
            state
                .events
                .publish(&user.id, ChatEventKind::ChatTouched { chat_id: chat.id.clone() });
            chat.id
        }
        None => {
            let chat = state.store.create_chat(&user.id, DEFAULT_CHAT_TITLE).await?;
            info!("Created chat {} for user {}", chat.id, user.id);
            state
                .events
                .publish(&user.id, ChatEventKind::ChatCreated { chat_id: chat.id.clone() });
            chat.id
        }
    };

    let message = state
        .store
        .upsert_message(id, &chat_id, body.role, &body.content)
        .await?;
    Ok(ok(json!({ "message": message })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<DeleteQuery>,
) -> ApiResult<impl IntoResponse> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing message id".to_string()))?;

    let message = state
        .store
        .find_message(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Message not found".to_string()))?;
    owned_chat(&state, &user, &message.chat_id)
        .await
        .map_err(|e| match e {
            ApiError::Forbidden(_) => ApiError::Forbidden("Unauthorized to delete this message".to_string()),
            other => other,
        })?;

    state.store.delete_message(&message.id).await?;
    state.events.publish(
        &user.id,
        ChatEventKind::MessageDeleted {
            chat_id: message.chat_id,
            message_id: message.id,
        },
    );
    Ok(ok_message("Message deleted"))
}

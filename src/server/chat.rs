//! Chat routes
//!
//! `POST /api/chat` is the streaming relay. Everything that can fail before
//! the first byte (auth, ownership, an already streaming chat, bad input) is
//! answered with the JSON envelope; once the relay runs, failures become an
//! `Error: ...` line inside the text stream.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::{ok, ok_message, ApiError, ApiResult};
use super::extract::{owned_chat, ApiJson, ApiQuery, AuthUser};
use super::AppState;
use crate::events::ChatEventKind;
use crate::relay::{build_request, spawn_relay, RelayOptions};
use crate::title::generate_title;

/// Longest accepted message, in characters.
pub const MAX_CONTENT_CHARS: usize = 50_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelayBody {
    #[serde(default)]
    messages: Vec<TurnInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleBody {
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    messages: Vec<TurnInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChatBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    page: Option<u32>,
}

fn validate_turns(messages: &[TurnInput]) -> ApiResult<()> {
    if messages.is_empty() {
        return Err(ApiError::BadRequest("No messages".to_string()));
    }
    if messages.iter().any(|m| m.content.chars().count() > MAX_CONTENT_CHARS) {
        return Err(ApiError::BadRequest(format!(
            "Message exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

fn non_empty(id: Option<&String>) -> Option<&str> {
    id.map(String::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub async fn relay(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<RelayBody>,
) -> ApiResult<Response> {
    validate_turns(&body.messages)?;

    let chat_id = body.messages.first().and_then(|m| non_empty(m.chat_id.as_ref()));
    let guard = match chat_id {
        Some(chat_id) => {
            owned_chat(&state, &user, chat_id).await?;
            let guard = state
                .in_flight
                .try_begin(chat_id)
                .ok_or_else(|| ApiError::Conflict("A reply is already streaming for this chat".to_string()))?;
            Some(guard)
        }
        None => None,
    };

    let request = build_request(body.messages.iter().map(|m| m.content.as_str()))
        .ok_or_else(|| ApiError::BadRequest("No messages".to_string()))?;

    info!(
        user = %user.id,
        chat = chat_id.unwrap_or("-"),
        turns = body.messages.len(),
        "Starting relay"
    );

    let options = RelayOptions {
        timeouts: state.config.relay,
        ..RelayOptions::default()
    };
    let (stream, handle) = spawn_relay(state.backend.clone(), request, options);

    // The chat stays claimed until the relay task has finished.
    tokio::spawn(async move {
        let _guard = guard;
        if let Err(e) = handle.await {
            warn!("Relay task failed: {}", e);
        }
    });

    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

pub async fn update_title(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<TitleBody>,
) -> ApiResult<impl IntoResponse> {
    validate_turns(&body.messages)?;

    let chat_id = non_empty(body.chat_id.as_ref())
        .or_else(|| body.messages.first().and_then(|m| non_empty(m.chat_id.as_ref())))
        .ok_or_else(|| ApiError::BadRequest("Missing chat id".to_string()))?
        .to_string();
    owned_chat(&state, &user, &chat_id).await?;

    let contents: Vec<String> = body.messages.into_iter().map(|m| m.content).collect();
    let title = generate_title(state.backend.clone(), &contents, state.config.relay)
        .await
        .map_err(ApiError::Upstream)?;

    state.store.update_chat_title(&chat_id, &title).await?;
    state.events.publish(
        &user.id,
        ChatEventKind::TitleChanged {
            chat_id: chat_id.clone(),
            title: title.clone(),
        },
    );

    info!("Titled chat {}: {}", chat_id, title);
    Ok(ok(json!({ "title": title })))
}

pub async fn update_chat(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<UpdateChatBody>,
) -> ApiResult<impl IntoResponse> {
    let title = body.title.trim();
    if body.id.trim().is_empty() || title.is_empty() {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }
    let chat = owned_chat(&state, &user, body.id.trim()).await?;

    state.store.update_chat_title(&chat.id, title).await?;
    state.events.publish(
        &user.id,
        ChatEventKind::TitleChanged {
            chat_id: chat.id,
            title: title.to_string(),
        },
    );
    Ok(ok_message("Chat updated"))
}

pub async fn list_chats(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let chats = state.store.list_chats(&user.id, page).await?;
    Ok(ok(chats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(content: &str) -> TurnInput {
        TurnInput {
            id: None,
            role: Some("user".into()),
            content: content.into(),
            chat_id: None,
        }
    }

    #[test]
    fn test_validate_turns() {
        assert!(validate_turns(&[]).is_err());
        assert!(validate_turns(&[turn("hi")]).is_ok());

        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(validate_turns(&[turn(&long)]), Err(ApiError::BadRequest(_))));
        assert!(validate_turns(&[turn(&"é".repeat(MAX_CONTENT_CHARS))]).is_ok());
    }
}

//! Request extractors.

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use tracing::debug;

use super::error::ApiError;
use super::AppState;
use crate::auth::session_token;
use crate::store::Chat;

/// JSON body whose rejections use the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejections use the API error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Caller identified by a valid session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let claims = state.tokens.verify(&token).map_err(|e| {
            debug!("Rejected session token: {}", e);
            ApiError::Unauthorized
        })?;
        Ok(AuthUser {
            id: claims.id,
            email: claims.email,
        })
    }
}

/// Load a chat the caller owns: 404 when unknown, 403 when someone else's.
pub async fn owned_chat(state: &AppState, user: &AuthUser, chat_id: &str) -> Result<Chat, ApiError> {
    let chat = state
        .store
        .find_chat(chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))?;
    if chat.user_id != user.id {
        return Err(ApiError::Forbidden("Unauthorized to access this chat".to_string()));
    }
    Ok(chat)
}

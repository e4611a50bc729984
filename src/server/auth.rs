//! Account routes: register, login, logout, me and password reset.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::{ok, ok_message, ApiError, ApiResult};
use super::extract::{ApiJson, AuthUser};
use super::AppState;
use crate::auth::{
    clear_session_cookie, hash_password_off_thread, new_reset_token, session_cookie, verify_password_off_thread,
    RESET_TOKEN_TTL_SECS,
};
use crate::mailer::reset_link;
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotBody {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetBody {
    #[serde(default)]
    token: String,
    #[serde(default)]
    password: String,
}

fn require(fields: &[&str]) -> ApiResult<()> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }
    Ok(())
}

const DUPLICATE_USER: &str = "Username or email already exists";

pub async fn register(State(state): State<AppState>, ApiJson(body): ApiJson<RegisterBody>) -> ApiResult<impl IntoResponse> {
    require(&[body.username.as_str(), body.email.as_str(), body.password.as_str()])?;
    let username = body.username.trim();
    let email = body.email.trim();

    if state.store.user_exists(username, email).await? {
        return Err(ApiError::BadRequest(DUPLICATE_USER.to_string()));
    }

    let hash = hash_password_off_thread(body.password.clone()).await?;
    let user = match state.store.create_user(username, email, &hash).await {
        Ok(user) => user,
        Err(StoreError::Conflict(_)) => return Err(ApiError::BadRequest(DUPLICATE_USER.to_string())),
        Err(e) => return Err(e.into()),
    };

    info!("Registered user {}", user.id);
    Ok(ok(json!({ "user": user })))
}

pub async fn login(State(state): State<AppState>, ApiJson(body): ApiJson<LoginBody>) -> ApiResult<impl IntoResponse> {
    require(&[body.email.as_str(), body.password.as_str()]).map_err(|_| ApiError::InvalidCredentials)?;

    let user = state
        .store
        .find_user_by_email(body.email.trim())
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !verify_password_off_thread(body.password.clone(), user.password_hash.clone()).await {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.tokens.issue(&user.id, &user.email)?;
    let cookie = session_cookie(&token, state.config.cookie_secure);

    info!("User {} logged in", user.id);
    Ok(([(header::SET_COOKIE, cookie)], ok(json!({ "user": user, "token": token }))))
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_session_cookie(state.config.cookie_secure))],
        ok_message("Logged out"),
    )
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<impl IntoResponse> {
    let user = state
        .store
        .find_user(&user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(ok(json!({ "user": user })))
}

/// Always reports success so that registered addresses cannot be probed.
pub async fn forgot_password(State(state): State<AppState>, ApiJson(body): ApiJson<ForgotBody>) -> ApiResult<impl IntoResponse> {
    require(&[body.email.as_str()])?;

    if let Some(user) = state.store.find_user_by_email(body.email.trim()).await? {
        let token = new_reset_token();
        let expires_at = Utc::now() + Duration::seconds(RESET_TOKEN_TTL_SECS);
        state.store.replace_reset_token(&user.id, &token, expires_at).await?;

        let link = reset_link(&state.config.app_url, &token);
        if let Err(e) = state.mailer.send_password_reset(&user.email, &user.username, &link).await {
            warn!("Failed to send password reset mail to {}: {:#}", user.email, e);
        }
    } else {
        info!("Password reset requested for unknown address");
    }

    Ok(ok_message("Password reset email sent"))
}

pub async fn reset_password(State(state): State<AppState>, ApiJson(body): ApiJson<ResetBody>) -> ApiResult<impl IntoResponse> {
    require(&[body.token.as_str(), body.password.as_str()])?;
    let invalid = || ApiError::BadRequest("Invalid or expired token".to_string());

    let reset = state.store.find_reset(body.token.trim()).await?.ok_or_else(invalid)?;
    if reset.expires_at <= Utc::now() {
        state.store.delete_reset(&reset.id).await?;
        return Err(invalid());
    }

    let hash = hash_password_off_thread(body.password.clone()).await?;
    state.store.update_password(&reset.user_id, &hash).await?;
    state.store.delete_reset(&reset.id).await?;

    info!("Password reset for user {}", reset.user_id);
    Ok(ok_message("Password has been reset"))
}

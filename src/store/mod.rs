//! Persistence Interface
//!
//! Users, password reset tokens, chats and their messages.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chats returned per page by [`Store::list_chats`].
pub const CHAT_PAGE_SIZE: u32 = 20;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordReset {
    pub id: String,
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::Corrupt(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub create_time: DateTime<Utc>,
}

/// One page of a user's chats, most recently updated first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub list: Vec<Chat>,
    pub has_more: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> StoreResult<User>;
    async fn user_exists(&self, username: &str, email: &str) -> StoreResult<bool>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn update_password(&self, user_id: &str, password_hash: &str) -> StoreResult<()>;

    /// Drop the user's previous reset tokens and store a new one.
    async fn replace_reset_token(&self, user_id: &str, token: &str, expires_at: DateTime<Utc>) -> StoreResult<()>;
    async fn find_reset(&self, token: &str) -> StoreResult<Option<PasswordReset>>;
    async fn delete_reset(&self, id: &str) -> StoreResult<()>;

    async fn create_chat(&self, user_id: &str, title: &str) -> StoreResult<Chat>;
    async fn find_chat(&self, id: &str) -> StoreResult<Option<Chat>>;
    /// `page` is 1-based.
    async fn list_chats(&self, user_id: &str, page: u32) -> StoreResult<ChatPage>;
    async fn update_chat_title(&self, id: &str, title: &str) -> StoreResult<()>;
    async fn touch_chat(&self, id: &str) -> StoreResult<()>;

    async fn find_message(&self, id: &str) -> StoreResult<Option<Message>>;
    async fn list_messages(&self, chat_id: &str) -> StoreResult<Vec<Message>>;
    /// Update the message with `id` when it exists, otherwise insert a new one.
    async fn upsert_message(&self, id: Option<&str>, chat_id: &str, role: Role, content: &str) -> StoreResult<Message>;
    async fn delete_message(&self, id: &str) -> StoreResult<()>;
}

//! SQLite implementation of [`Store`].
//!
//! Every operation opens its own connection on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::{Chat, ChatPage, Message, PasswordReset, Role, Store, StoreError, StoreResult, User, CHAT_PAGE_SIZE};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS password_resets (
    id TEXT PRIMARY KEY,
    token TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    update_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    create_time TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_user_time ON chats(user_id, update_time);
CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_id, create_time);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            f(&mut conn)
        })
        .await?
    }
}

/// Current time at the precision stored in the database.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

type UserRow = (String, String, String, String, String);

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_user((id, username, email, password_hash, created_at): UserRow) -> StoreResult<User> {
    Ok(User {
        id,
        username,
        email,
        password_hash,
        created_at: parse_ts(&created_at)?,
    })
}

type ChatRow = (String, String, String, String);

fn chat_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_chat((id, user_id, title, update_time): ChatRow) -> StoreResult<Chat> {
    Ok(Chat {
        id,
        user_id,
        title,
        update_time: parse_ts(&update_time)?,
    })
}

type MessageRow = (String, String, String, String, String);

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_message((id, chat_id, role, content, create_time): MessageRow) -> StoreResult<Message> {
    Ok(Message {
        id,
        chat_id,
        role: role.parse()?,
        content,
        create_time: parse_ts(&create_time)?,
    })
}

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";
const CHAT_COLUMNS: &str = "id, user_id, title, update_time";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, create_time";

#[async_trait]
impl Store for SqliteStore {
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> StoreResult<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now(),
        };
        let row = user.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&row.id, &row.username, &row.email, &row.password_hash, ts(&row.created_at)],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("username or email".to_string())
                } else {
                    StoreError::from(e)
                }
            })?;
            Ok(())
        })
        .await?;

        Ok(user)
    }

    async fn user_exists(&self, username: &str, email: &str) -> StoreResult<bool> {
        let (username, email) = (username.to_string(), email.to_string());
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
                params![&username, &email],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    params![&email],
                    user_row,
                )
                .optional()?;
            row.map(into_user).transpose()
        })
        .await
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"), params![&id], user_row)
                .optional()?;
            row.map(into_user).transpose()
        })
        .await
    }

    async fn update_password(&self, user_id: &str, password_hash: &str) -> StoreResult<()> {
        let (id, hash) = (user_id.to_string(), password_hash.to_string());
        self.with_conn(move |conn| {
            conn.execute("UPDATE users SET password_hash = ?1 WHERE id = ?2", params![&hash, &id])?;
            Ok(())
        })
        .await
    }

    async fn replace_reset_token(&self, user_id: &str, token: &str, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let (user_id, token) = (user_id.to_string(), token.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM password_resets WHERE user_id = ?1", params![&user_id])?;
            tx.execute(
                "INSERT INTO password_resets (id, token, user_id, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![Uuid::new_v4().to_string(), &token, &user_id, ts(&expires_at)],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_reset(&self, token: &str) -> StoreResult<Option<PasswordReset>> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, String, String, String)> = conn
                .query_row(
                    "SELECT id, token, user_id, expires_at FROM password_resets WHERE token = ?1",
                    params![&token],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(|(id, token, user_id, expires_at)| {
                Ok(PasswordReset {
                    id,
                    token,
                    user_id,
                    expires_at: parse_ts(&expires_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn delete_reset(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM password_resets WHERE id = ?1", params![&id])?;
            Ok(())
        })
        .await
    }

    async fn create_chat(&self, user_id: &str, title: &str) -> StoreResult<Chat> {
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            update_time: now(),
        };
        let row = chat.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chats (id, user_id, title, update_time) VALUES (?1, ?2, ?3, ?4)",
                params![&row.id, &row.user_id, &row.title, ts(&row.update_time)],
            )?;
            Ok(())
        })
        .await?;
        Ok(chat)
    }

    async fn find_chat(&self, id: &str) -> StoreResult<Option<Chat>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"), params![&id], chat_row)
                .optional()?;
            row.map(into_chat).transpose()
        })
        .await
    }

    async fn list_chats(&self, user_id: &str, page: u32) -> StoreResult<ChatPage> {
        let user_id = user_id.to_string();
        let page = page.max(1);
        self.with_conn(move |conn| {
            let offset = i64::from(page - 1) * i64::from(CHAT_PAGE_SIZE);
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats WHERE user_id = ?1 ORDER BY update_time DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![&user_id, i64::from(CHAT_PAGE_SIZE), offset], chat_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let list = rows.into_iter().map(into_chat).collect::<StoreResult<Vec<_>>>()?;

            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chats WHERE user_id = ?1", params![&user_id], |row| {
                row.get(0)
            })?;
            let has_more = count > i64::from(page) * i64::from(CHAT_PAGE_SIZE);
            Ok(ChatPage { list, has_more })
        })
        .await
    }

    async fn update_chat_title(&self, id: &str, title: &str) -> StoreResult<()> {
        let (id, title) = (id.to_string(), title.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE chats SET title = ?1, update_time = ?2 WHERE id = ?3",
                params![&title, ts(&now()), &id],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch_chat(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("UPDATE chats SET update_time = ?1 WHERE id = ?2", params![ts(&now()), &id])?;
            Ok(())
        })
        .await
    }

    async fn find_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![&id],
                    message_row,
                )
                .optional()?;
            row.map(into_message).transpose()
        })
        .await
    }

    async fn list_messages(&self, chat_id: &str) -> StoreResult<Vec<Message>> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY create_time ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map(params![&chat_id], message_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(into_message).collect()
        })
        .await
    }

    async fn upsert_message(&self, id: Option<&str>, chat_id: &str, role: Role, content: &str) -> StoreResult<Message> {
        let id = id.filter(|s| !s.is_empty()).map(str::to_string);
        let (chat_id, content) = (chat_id.to_string(), content.to_string());

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let existing = match &id {
                Some(id) => tx
                    .query_row(
                        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                        params![id],
                        message_row,
                    )
                    .optional()?,
                None => None,
            };

            let message = match existing {
                Some(row) => {
                    let mut message = into_message(row)?;
                    tx.execute(
                        "UPDATE messages SET chat_id = ?1, role = ?2, content = ?3 WHERE id = ?4",
                        params![&chat_id, role.as_str(), &content, &message.id],
                    )?;
                    message.chat_id = chat_id;
                    message.role = role;
                    message.content = content;
                    message
                }
                None => {
                    let message = Message {
                        id: Uuid::new_v4().to_string(),
                        chat_id,
                        role,
                        content,
                        create_time: now(),
                    };
                    tx.execute(
                        "INSERT INTO messages (id, chat_id, role, content, create_time) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![&message.id, &message.chat_id, role.as_str(), &message.content, ts(&message.create_time)],
                    )?;
                    message
                }
            };

            tx.commit()?;
            Ok(message)
        })
        .await
    }

    async fn delete_message(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", params![&id])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    async fn store() -> (NamedTempFile, SqliteStore) {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(file.path()).await.unwrap();
        (file, store)
    }

    #[tokio::test]
    async fn test_user_roundtrip_and_uniqueness() -> anyhow::Result<()> {
        let (_file, store) = store().await;
        let user = store.create_user("alice", "alice@example.com", "hash").await?;

        let found = store.find_user_by_email("alice@example.com").await?.expect("user");
        assert_eq!(found.id, user.id);
        assert_eq!(found.password_hash, "hash");
        assert!(store.user_exists("alice", "other@example.com").await?);
        assert!(!store.user_exists("bob", "bob@example.com").await?);

        let dup = store.create_user("alice", "x@example.com", "hash").await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        store.update_password(&user.id, "new-hash").await?;
        assert_eq!(store.find_user(&user.id).await?.unwrap().password_hash, "new-hash");
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_token_replaced() -> anyhow::Result<()> {
        let (_file, store) = store().await;
        let user = store.create_user("bob", "bob@example.com", "hash").await?;
        let expires = Utc::now() + Duration::hours(1);

        store.replace_reset_token(&user.id, "first", expires).await?;
        store.replace_reset_token(&user.id, "second", expires).await?;

        assert!(store.find_reset("first").await?.is_none());
        let reset = store.find_reset("second").await?.expect("reset");
        assert_eq!(reset.user_id, user.id);

        store.delete_reset(&reset.id).await?;
        assert!(store.find_reset("second").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_pages_newest_first() -> anyhow::Result<()> {
        let (_file, store) = store().await;
        let user = store.create_user("carol", "carol@example.com", "hash").await?;

        let mut ids = Vec::new();
        for i in 0..25 {
            ids.push(store.create_chat(&user.id, &format!("chat {i}")).await?.id);
        }
        // Touching the oldest chat moves it to the front.
        store.touch_chat(&ids[0]).await?;

        let first = store.list_chats(&user.id, 1).await?;
        assert_eq!(first.list.len(), 20);
        assert!(first.has_more);
        assert_eq!(first.list[0].id, ids[0]);

        let second = store.list_chats(&user.id, 2).await?;
        assert_eq!(second.list.len(), 5);
        assert!(!second.has_more);
        Ok(())
    }

    #[tokio::test]
    async fn test_message_upsert_and_delete() -> anyhow::Result<()> {
        let (_file, store) = store().await;
        let user = store.create_user("dave", "dave@example.com", "hash").await?;
        let chat = store.create_chat(&user.id, "New Chat").await?;

        let question = store.upsert_message(None, &chat.id, Role::User, "hello").await?;
        let draft = store.upsert_message(Some(""), &chat.id, Role::Assistant, "").await?;
        let reply = store
            .upsert_message(Some(draft.id.as_str()), &chat.id, Role::Assistant, "hi there")
            .await?;
        assert_eq!(reply.id, draft.id);
        assert_eq!(reply.create_time, draft.create_time);

        let messages = store.list_messages(&chat.id).await?;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, question.id);
        assert_eq!(messages[1].content, "hi there");

        store.delete_message(&question.id).await?;
        assert!(store.find_message(&question.id).await?.is_none());
        assert_eq!(store.list_messages(&chat.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_id_upsert_inserts() -> anyhow::Result<()> {
        let (_file, store) = store().await;
        let user = store.create_user("erin", "erin@example.com", "hash").await?;
        let chat = store.create_chat(&user.id, "New Chat").await?;

        let message = store.upsert_message(Some("missing"), &chat.id, Role::User, "x").await?;
        assert_ne!(message.id, "missing");
        Ok(())
    }
}

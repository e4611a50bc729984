//! Chat API Client
//!
//! Talks to a running server over its JSON API and reads relayed replies
//! incrementally through a [`StreamConsumer`].

mod consumer;

pub use consumer::StreamConsumer;

use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::SESSION_COOKIE;
use crate::store::{ChatPage, Message, Role, User};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("not logged in")]
    NoSession,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: User,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    user: User,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    list: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct TitleData {
    title: String,
}

/// Result of [`ChatClient::send`].
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub chat_id: String,
    pub user_message: Message,
    pub assistant_message: Message,
    /// The read was stopped before the reply ended; the partial transcript was saved.
    pub cancelled: bool,
}

pub struct ChatClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NoSession)?;
        Ok(builder.header(header::COOKIE, format!("{SESSION_COOKIE}={token}")))
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let res = builder.send().await?;
        let status = res.status();
        let envelope: Envelope<T> = res
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("{status}: {e}")))?;

        if !status.is_success() || envelope.code != 0 {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| status.to_string()),
            });
        }
        envelope
            .data
            .ok_or_else(|| ClientError::Decode("missing data".to_string()))
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User, ClientError> {
        let req = self
            .http
            .post(self.url("/api/auth/register"))
            .json(&json!({ "username": username, "email": email, "password": password }));
        let data: UserData = self.call(req).await?;
        Ok(data.user)
    }

    /// Log in and keep the session token for later calls.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<User, ClientError> {
        let req = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }));
        let data: LoginData = self.call(req).await?;
        self.token = Some(data.token);
        Ok(data.user)
    }

    pub async fn me(&self) -> Result<User, ClientError> {
        let req = self.authed(self.http.get(self.url("/api/auth/me")))?;
        let data: UserData = self.call(req).await?;
        Ok(data.user)
    }

    pub async fn list_chats(&self, page: u32) -> Result<ChatPage, ClientError> {
        let req = self.authed(self.http.get(self.url("/api/chat/list")).query(&[("page", page)]))?;
        self.call(req).await
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, ClientError> {
        let req = self.authed(self.http.get(self.url("/api/message/list")).query(&[("chatId", chat_id)]))?;
        let data: MessageList = self.call(req).await?;
        Ok(data.list)
    }

    /// Create or rewrite a message. Without `chat_id` the server opens a new chat.
    pub async fn update_message(
        &self,
        id: Option<&str>,
        chat_id: Option<&str>,
        role: Role,
        content: &str,
    ) -> Result<Message, ClientError> {
        let req = self.authed(self.http.post(self.url("/api/message/update")).json(&json!({
            "id": id,
            "chatId": chat_id,
            "role": role,
            "content": content,
        })))?;
        let data: MessageData = self.call(req).await?;
        Ok(data.message)
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), ClientError> {
        let req = self.authed(self.http.post(self.url("/api/message/delete")).query(&[("id", id)]))?;
        let res = req.send().await?;
        let status = res.status();
        let envelope: Envelope<Value> = res
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("{status}: {e}")))?;
        if !status.is_success() || envelope.code != 0 {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| status.to_string()),
            });
        }
        Ok(())
    }

    pub async fn update_title(&self, chat_id: &str, history: &[Message]) -> Result<String, ClientError> {
        let req = self.authed(self.http.post(self.url("/api/chat/updatetitle")).json(&json!({
            "chatId": chat_id,
            "messages": turns(history, Some(chat_id)),
        })))?;
        let data: TitleData = self.call(req).await?;
        Ok(data.title)
    }

    /// Open the relay for `history`; the last entry is the new user message.
    pub async fn stream_reply(&self, chat_id: Option<&str>, history: &[Message]) -> Result<Response, ClientError> {
        let req = self.authed(
            self.http
                .post(self.url("/api/chat"))
                .json(&json!({ "messages": turns(history, chat_id) })),
        )?;
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let message = match res.json::<Envelope<Value>>().await {
            Ok(envelope) => envelope.message.unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Run one chat turn end to end.
    ///
    /// Saves the user message, streams the reply calling `on_update` with the
    /// transcript after every read, and saves the transcript as the assistant
    /// message. Cancelling `cancel` stops reading; what arrived so far is
    /// still saved.
    pub async fn send<F>(
        &self,
        chat_id: Option<&str>,
        history: &[Message],
        content: &str,
        mut on_update: F,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, ClientError>
    where
        F: FnMut(&str),
    {
        let user_message = self.update_message(None, chat_id, Role::User, content).await?;
        let chat_id = user_message.chat_id.clone();

        let mut turns = history.to_vec();
        turns.push(user_message.clone());

        let response = self.stream_reply(Some(chat_id.as_str()), &turns).await?;
        let draft = self.update_message(None, Some(chat_id.as_str()), Role::Assistant, "").await?;

        let mut consumer = StreamConsumer::new();
        let mut body = response.bytes_stream();
        let mut cancelled = false;
        let mut read_error = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = body.next() => next,
            };
            match next {
                Some(Ok(bytes)) => on_update(consumer.push(&bytes)),
                Some(Err(e)) => {
                    warn!("Reply stream broke off: {}", e);
                    read_error = Some(e);
                    break;
                }
                None => break,
            }
        }
        drop(body);

        let transcript = consumer.into_transcript();
        debug!("Saving {} bytes of reply (cancelled: {})", transcript.len(), cancelled);
        let assistant_message = self
            .update_message(Some(draft.id.as_str()), Some(chat_id.as_str()), Role::Assistant, &transcript)
            .await?;

        if let Some(e) = read_error {
            return Err(e.into());
        }
        Ok(SendOutcome {
            chat_id,
            user_message,
            assistant_message,
            cancelled,
        })
    }
}

fn turns(history: &[Message], chat_id: Option<&str>) -> Vec<Value> {
    history
        .iter()
        .map(|m| json!({ "id": m.id, "role": m.role, "content": m.content, "chatId": chat_id }))
        .collect()
}

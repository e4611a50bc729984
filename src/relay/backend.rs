//! Inference backend client
//!
//! One `POST` per chat turn. The backend answers either with an SSE body or,
//! for non-streaming deployments, with a single JSON object carrying the
//! whole `response`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Status(String),
    #[error("No response body")]
    MissingBody,
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Body sent to the inference service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InferenceRequest {
    /// Earlier turns, one per line.
    pub context: String,
    /// The new user message.
    pub content: String,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

pub enum UpstreamReply {
    /// Raw SSE body, read incrementally.
    Stream(ByteStream),
    /// Whole reply delivered at once.
    Complete(String),
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamReply::Stream(_) => f.write_str("UpstreamReply::Stream(..)"),
            UpstreamReply::Complete(text) => f.debug_tuple("UpstreamReply::Complete").field(text).finish(),
        }
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn open(&self, request: InferenceRequest) -> Result<UpstreamReply, BackendError>;
}

pub struct HttpInferenceBackend {
    client: Client,
    url: String,
}

impl HttpInferenceBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    async fn open(&self, request: InferenceRequest) -> Result<UpstreamReply, BackendError> {
        debug!("Opening upstream request to {} ({} context bytes)", self.url, request.context.len());

        let res = self
            .client
            .post(&self.url)
            .header(header::ACCEPT, "text/event-stream, application/json")
            .json(&request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Upstream error");
            return Err(BackendError::Status(format!("{} {}", status.as_u16(), reason)));
        }

        let is_json = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let body: Value = res.json().await?;
            let text = body
                .get("response")
                .and_then(Value::as_str)
                .ok_or(BackendError::MissingBody)?;
            return Ok(UpstreamReply::Complete(text.to_string()));
        }

        let stream = res.bytes_stream().map(|chunk| chunk.map_err(BackendError::from));
        Ok(UpstreamReply::Stream(stream.boxed()))
    }
}

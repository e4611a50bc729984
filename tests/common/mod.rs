#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use support_chat::mailer::Mailer;
use support_chat::relay::{BackendError, InferenceBackend, InferenceRequest, UpstreamReply};

/// One scripted upstream answer.
#[derive(Debug, Clone)]
pub enum Script {
    /// Raw reads of an SSE body, delivered in order.
    Sse(Vec<String>),
    /// Whole JSON `response`.
    Complete(String),
    /// Non-success status or transport failure before the body.
    Fail(String),
}

/// Backend that answers from a queue of scripts, repeating the last one.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    pub requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        let fallback = scripts.last().cloned().unwrap_or(Script::Sse(vec![sse_done()]));
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// SSE reply streaming `chunks` then `done`.
    pub fn chunks(chunks: &[&str]) -> Arc<Self> {
        Self::new(vec![sse_script(chunks)])
    }

    pub fn last_request(&self) -> Option<InferenceRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn open(&self, request: InferenceRequest) -> Result<UpstreamReply, BackendError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match script {
            Script::Sse(reads) => {
                let items: Vec<Result<Bytes, BackendError>> = reads.into_iter().map(|r| Ok(Bytes::from(r))).collect();
                Ok(UpstreamReply::Stream(futures::stream::iter(items).boxed()))
            }
            Script::Complete(text) => Ok(UpstreamReply::Complete(text)),
            Script::Fail(status) => Err(BackendError::Status(status)),
        }
    }
}

/// Backend whose single stream is fed by the test through a channel.
pub struct ChannelBackend {
    upstream: Mutex<Option<mpsc::Receiver<Result<Bytes, BackendError>>>>,
}

impl ChannelBackend {
    pub fn new() -> (Arc<Self>, mpsc::Sender<Result<Bytes, BackendError>>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(Self {
                upstream: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl InferenceBackend for ChannelBackend {
    async fn open(&self, _request: InferenceRequest) -> Result<UpstreamReply, BackendError> {
        let rx = self
            .upstream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BackendError::Status("already opened".into()))?;
        Ok(UpstreamReply::Stream(ReceiverStream::new(rx).boxed()))
    }
}

/// Backend that never answers.
pub struct StallingBackend;

#[async_trait]
impl InferenceBackend for StallingBackend {
    async fn open(&self, _request: InferenceRequest) -> Result<UpstreamReply, BackendError> {
        futures::future::pending().await
    }
}

pub fn sse_chunk(text: &str) -> String {
    format!("data: {}\n\n", json!({ "chunk": text }))
}

pub fn sse_done() -> String {
    format!("data: {}\n\n", json!({ "done": true }))
}

pub fn sse_error(message: &str) -> String {
    format!("data: {}\n\n", json!({ "error": message }))
}

pub fn sse_script(chunks: &[&str]) -> Script {
    let mut reads: Vec<String> = chunks.iter().map(|c| sse_chunk(c)).collect();
    reads.push(sse_done());
    Script::Sse(reads)
}

/// Mailer that keeps every reset link it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    pub links: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(&self, to: &str, _username: &str, link: &str) -> anyhow::Result<()> {
        self.links.lock().unwrap().push((to.to_string(), link.to_string()));
        Ok(())
    }
}

//! Relay responder
//!
//! Runs one chat turn: opens the upstream reply, pushes it through the SSE
//! decoder and the reasoning filter, and forwards the rendered bytes into a
//! bounded channel that backs the HTTP response body.
//!
//! The relay task owns the only sender. Whatever happens (completion,
//! upstream failure, timeout, caller going away, even a panic) the sender
//! is dropped and the outward stream ends.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::backend::{InferenceBackend, InferenceRequest, UpstreamReply};
use super::sse::{SseDecoder, SseEvent};
use super::think::{Segment, ThinkFilter, ThinkRender};
use crate::config::RelayTimeouts;

/// Outward buffer between the relay task and the response body.
const CHANNEL_CAPACITY: usize = 32;

pub const TIMEOUT_MESSAGE: &str = "upstream timed out";

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed,
    UpstreamFailed(String),
    TimedOut,
    /// The reader went away before the reply finished.
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    pub render: ThinkRender,
    pub timeouts: RelayTimeouts,
}

/// Text written into the stream for a failure.
pub fn error_chunk(message: &str) -> String {
    format!("Error: {message}")
}

/// Join all turns but the last into the context block; the last is the new content.
pub fn build_request<'a>(contents: impl IntoIterator<Item = &'a str>) -> Option<InferenceRequest> {
    let mut contents: Vec<&str> = contents.into_iter().collect();
    let content = contents.pop()?.to_string();
    Some(InferenceRequest {
        context: contents.join("\n"),
        content,
    })
}

/// Start a relay task; the returned stream yields the rendered reply.
pub fn spawn_relay(
    backend: Arc<dyn InferenceBackend>,
    request: InferenceRequest,
    options: RelayOptions,
) -> (ReceiverStream<Bytes>, tokio::task::JoinHandle<RelayOutcome>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let outcome = run_relay(backend.as_ref(), request, options, tx).await;
        match &outcome {
            RelayOutcome::Completed => info!("Relay completed"),
            RelayOutcome::Cancelled => info!("Relay cancelled by reader"),
            RelayOutcome::TimedOut => warn!("Relay timed out waiting for upstream"),
            RelayOutcome::UpstreamFailed(msg) => warn!("Relay ended with upstream failure: {}", msg),
        }
        outcome
    });
    (ReceiverStream::new(rx), handle)
}

/// Drive one relay to completion, writing into `tx`.
pub async fn run_relay(
    backend: &dyn InferenceBackend,
    request: InferenceRequest,
    options: RelayOptions,
    tx: mpsc::Sender<Bytes>,
) -> RelayOutcome {
    let mut out = RelayWriter {
        tx,
        filter: ThinkFilter::new(),
        render: options.render,
    };

    let opened = tokio::select! {
        biased;
        _ = out.tx.closed() => return RelayOutcome::Cancelled,
        res = timeout(options.timeouts.first_byte, backend.open(request)) => res,
    };

    let reply = match opened {
        Err(_) => return out.fail_timeout().await,
        Ok(Err(e)) => return out.fail(e.to_string()).await,
        Ok(Ok(reply)) => reply,
    };

    let mut upstream = match reply {
        UpstreamReply::Complete(text) => {
            let segments = out.filter.push(&text);
            if !out.send_segments(&segments).await {
                return RelayOutcome::Cancelled;
            }
            return out.complete().await;
        }
        UpstreamReply::Stream(stream) => stream,
    };

    let mut decoder = SseDecoder::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = out.tx.closed() => return RelayOutcome::Cancelled,
            res = timeout(options.timeouts.idle, upstream.next()) => res,
        };

        let bytes = match next {
            Err(_) => return out.fail_timeout().await,
            Ok(None) => {
                let events = decoder.finish();
                if let Some(outcome) = out.apply_events(events).await {
                    return outcome;
                }
                return out.complete().await;
            }
            Ok(Some(Err(e))) => return out.fail(e.to_string()).await,
            Ok(Some(Ok(bytes))) => bytes,
        };

        let events = decoder.push(&bytes);
        if let Some(outcome) = out.apply_events(events).await {
            return outcome;
        }
    }
}

struct RelayWriter {
    tx: mpsc::Sender<Bytes>,
    filter: ThinkFilter,
    render: ThinkRender,
}

impl RelayWriter {
    /// Returns an outcome once an event ends the relay.
    async fn apply_events(&mut self, events: Vec<SseEvent>) -> Option<RelayOutcome> {
        for event in events {
            match event {
                SseEvent::Chunk(text) => {
                    let segments = self.filter.push(&text);
                    if !self.send_segments(&segments).await {
                        return Some(RelayOutcome::Cancelled);
                    }
                }
                SseEvent::Done => return Some(self.complete().await),
                SseEvent::Error(msg) => return Some(self.fail(msg).await),
            }
        }
        None
    }

    async fn complete(&mut self) -> RelayOutcome {
        let segments = self.filter.finish();
        if !self.send_segments(&segments).await {
            return RelayOutcome::Cancelled;
        }
        RelayOutcome::Completed
    }

    async fn fail(&mut self, message: String) -> RelayOutcome {
        if !self.close_open_block().await || !self.send(error_chunk(&message)).await {
            return RelayOutcome::Cancelled;
        }
        RelayOutcome::UpstreamFailed(message)
    }

    async fn fail_timeout(&mut self) -> RelayOutcome {
        if !self.close_open_block().await || !self.send(error_chunk(TIMEOUT_MESSAGE)).await {
            return RelayOutcome::Cancelled;
        }
        RelayOutcome::TimedOut
    }

    async fn close_open_block(&mut self) -> bool {
        let segments = self.filter.finish();
        self.send_segments(&segments).await
    }

    async fn send_segments(&self, segments: &[Segment]) -> bool {
        if segments.is_empty() {
            return true;
        }
        self.send(self.render.render(segments)).await
    }

    /// False when the reader is gone.
    async fn send(&self, text: String) -> bool {
        if text.is_empty() {
            return true;
        }
        self.tx.send(Bytes::from(text)).await.is_ok()
    }
}

/// Read a relay stream to the end. Used where the reply is consumed server side.
pub async fn collect(mut stream: ReceiverStream<Bytes>) -> String {
    let mut buf = Vec::new();
    while let Some(bytes) = stream.next().await {
        buf.extend_from_slice(&bytes);
    }
    String::from_utf8_lossy(&buf).into_owned()
}


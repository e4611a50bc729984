//! Streaming Response Relay
//!
//! Forwards a chat turn to the inference backend and re-streams the reply
//! with reasoning blocks rewritten on the fly.

pub mod backend;
pub mod inflight;
pub mod responder;
pub mod sse;
pub mod think;

pub use backend::{BackendError, HttpInferenceBackend, InferenceBackend, InferenceRequest, UpstreamReply};
pub use inflight::{InFlightChats, InFlightGuard};
pub use responder::{build_request, collect, error_chunk, run_relay, spawn_relay, RelayOptions, RelayOutcome};
pub use sse::{SseDecoder, SseEvent};
pub use think::{Segment, ThinkFilter, ThinkMode, ThinkRender};

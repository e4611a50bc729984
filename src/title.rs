//! Chat title generation
//!
//! Asks the backend for a short topic of the conversation, reading the reply
//! through the relay with reasoning stripped, and cleans it up into a title.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::RelayTimeouts;
use crate::relay::{build_request, collect, spawn_relay, InferenceBackend, RelayOptions, RelayOutcome, ThinkRender};
use crate::store::DEFAULT_CHAT_TITLE;

pub const MAX_TITLE_CHARS: usize = 100;

pub const TITLE_PROMPT: &str = "Reply with a 5 to 10 word topic for this conversation. \
No explanation, no punctuation, no filler. If there is no topic, reply 'New Chat'.";

/// Any markup tag left in a model reply.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Tidy raw model output into a title.
pub fn normalize_title(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, "");
    let without_header = without_tags.replacen("### Response:", "", 1);
    let collapsed = without_header.split_whitespace().collect::<Vec<_>>().join(" ");
    let title: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let title = title.trim();
    if title.is_empty() {
        DEFAULT_CHAT_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Generate a title for a conversation given its message contents in order.
///
/// Returns the backend's failure message when the reply did not complete.
pub async fn generate_title(
    backend: Arc<dyn InferenceBackend>,
    contents: &[String],
    timeouts: RelayTimeouts,
) -> Result<String, String> {
    let request = build_request(contents.iter().map(String::as_str).chain(std::iter::once(TITLE_PROMPT)))
        .ok_or_else(|| "no messages".to_string())?;

    let options = RelayOptions {
        render: ThinkRender::Strip,
        timeouts,
    };
    let (stream, handle) = spawn_relay(backend, request, options);
    let raw = collect(stream).await;

    match handle.await {
        Ok(RelayOutcome::Completed) => Ok(normalize_title(&raw)),
        Ok(RelayOutcome::UpstreamFailed(msg)) => Err(msg),
        Ok(RelayOutcome::TimedOut) => Err(crate::relay::responder::TIMEOUT_MESSAGE.to_string()),
        Ok(RelayOutcome::Cancelled) => Err("title generation cancelled".to_string()),
        Err(e) => Err(format!("title task failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cleans_markup_and_space() {
        assert_eq!(normalize_title("  ### Response:\n Refund   <b>request</b>\n"), "Refund request");
    }

    #[test]
    fn test_normalize_caps_length() {
        let long = "a".repeat(150);
        assert_eq!(normalize_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_normalize_falls_back() {
        assert_eq!(normalize_title(" \n <br> "), DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_tag_pattern_reused_across_titles() {
        for raw in ["<i>Billing</i> issue", "Login <span>help</span>", "<p></p>"] {
            assert!(!normalize_title(raw).contains('<'));
        }
        assert!(TAG_RE.is_match("<think>"));
    }
}

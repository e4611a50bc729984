//! Reasoning-block filter
//!
//! Models interleave `<think>...</think>` spans with the visible answer.
//! [`ThinkFilter`] is an incremental scanner over streamed text that splits
//! it into normal and reasoning [`Segment`]s. Markers may arrive whole, split
//! across chunks, or never close; a reasoning block left open is closed by
//! [`ThinkFilter::finish`].
//!
//! A filter holds the state of exactly one reply. Every relay creates its
//! own instance.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

pub const START_MARKER: &str = "<think>";
pub const END_MARKER: &str = "</think>";

/// Header label of the rendered reasoning container.
pub const BLOCK_LABEL: &str = "Thinking process";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkMode {
    Normal,
    Reasoning,
}

/// Classified piece of filter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Open { id: String },
    Reasoning(String),
    Close { id: String },
}

/// How reasoning blocks are turned back into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkRender {
    /// Collapsible `<details>` container around the reasoning.
    #[default]
    Wrap,
    /// Reasoning and its container are dropped.
    Strip,
    /// Original markers are kept around the reasoning.
    Raw,
}

impl ThinkRender {
    pub fn render(self, segments: &[Segment]) -> String {
        let mut out = String::new();
        for segment in segments {
            self.render_into(segment, &mut out);
        }
        out
    }

    fn render_into(self, segment: &Segment, out: &mut String) {
        match (self, segment) {
            (_, Segment::Text(text)) => out.push_str(text),
            (ThinkRender::Strip, _) => {}
            (_, Segment::Reasoning(text)) => out.push_str(text),
            (ThinkRender::Wrap, Segment::Open { id }) => out.push_str(&open_wrapper(id)),
            (ThinkRender::Wrap, Segment::Close { .. }) => out.push_str(CLOSE_WRAPPER),
            (ThinkRender::Raw, Segment::Open { .. }) => out.push_str(START_MARKER),
            (ThinkRender::Raw, Segment::Close { .. }) => out.push_str(END_MARKER),
        }
    }
}

const CLOSE_WRAPPER: &str = "</div></details>";

fn open_wrapper(id: &str) -> String {
    format!(
        "\n<details class=\"thinking-block\" id=\"{id}\" open>\n  <summary class=\"thinking-summary\">\n    <div class=\"thinking-icon\">💭</div>\n    <div class=\"thinking-title\">{BLOCK_LABEL}</div>\n  </summary>\n  <div class=\"thinking-content\">\n"
    )
}

#[derive(Debug)]
pub struct ThinkFilter {
    mode: ThinkMode,
    /// Reasoning text of the current (or last closed) block.
    reasoning: String,
    /// Blocks opened so far.
    counter: u64,
    current_id: String,
    /// Possible marker prefix held back from the end of the previous chunk.
    carry: String,
}

impl Default for ThinkFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self {
            mode: ThinkMode::Normal,
            reasoning: String::new(),
            counter: 0,
            current_id: String::new(),
            carry: String::new(),
        }
    }

    pub fn mode(&self) -> ThinkMode {
        self.mode
    }

    /// Number of reasoning blocks opened so far.
    pub fn blocks(&self) -> u64 {
        self.counter
    }

    /// Reasoning accumulated for the current or most recently closed block.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Scan one chunk of streamed text.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        if chunk.trim().is_empty() {
            return out;
        }

        let mut input = std::mem::take(&mut self.carry);
        input.push_str(chunk);

        let mut rest = input.as_str();
        loop {
            match self.mode {
                ThinkMode::Normal => match rest.find(START_MARKER) {
                    Some(idx) => {
                        push_text(&mut out, &rest[..idx]);
                        self.open(&mut out);
                        rest = &rest[idx + START_MARKER.len()..];
                    }
                    None => {
                        let keep = partial_marker_len(rest, START_MARKER);
                        let (emit, held) = rest.split_at(rest.len() - keep);
                        push_text(&mut out, emit);
                        self.carry = held.to_string();
                        break;
                    }
                },
                ThinkMode::Reasoning => match rest.find(END_MARKER) {
                    Some(idx) => {
                        self.push_reasoning(&mut out, &rest[..idx]);
                        self.close(&mut out);
                        rest = &rest[idx + END_MARKER.len()..];
                    }
                    None => {
                        let keep = partial_marker_len(rest, END_MARKER);
                        let (emit, held) = rest.split_at(rest.len() - keep);
                        self.push_reasoning(&mut out, emit);
                        self.carry = held.to_string();
                        break;
                    }
                },
            }
        }
        out
    }

    /// End of stream: flush held-back text and close an open block.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let carry = std::mem::take(&mut self.carry);
        match self.mode {
            ThinkMode::Normal => push_text(&mut out, &carry),
            ThinkMode::Reasoning => {
                self.push_reasoning(&mut out, &carry);
                debug!("Closing unterminated reasoning block {}", self.current_id);
                self.close(&mut out);
            }
        }
        out
    }

    fn open(&mut self, out: &mut Vec<Segment>) {
        self.mode = ThinkMode::Reasoning;
        self.reasoning.clear();
        self.counter += 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        self.current_id = format!("thinking-block-{}-{}", millis, self.counter);
        out.push(Segment::Open { id: self.current_id.clone() });
    }

    fn push_reasoning(&mut self, out: &mut Vec<Segment>, text: &str) {
        if text.is_empty() {
            return;
        }
        self.reasoning.push_str(text);
        out.push(Segment::Reasoning(text.to_string()));
    }

    fn close(&mut self, out: &mut Vec<Segment>) {
        self.mode = ThinkMode::Normal;
        debug!("Reasoning block {} closed ({} bytes)", self.current_id, self.reasoning.len());
        out.push(Segment::Close { id: self.current_id.clone() });
    }
}

fn push_text(out: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        out.push(Segment::Text(text.to_string()));
    }
}

/// Length of the longest proper prefix of `marker` that `text` ends with.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

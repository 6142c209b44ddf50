//! Re-express a complete normalized response as protocol wire frames.
//!
//! [`emit`] is lazy and stateless over its input: calling it twice with the
//! same response yields the same frames in the same order. Heartbeats and
//! delivery to the peer live in [`heartbeat`], outside the frame sequence.

pub mod anthropic;
pub mod heartbeat;
pub mod openai;

pub use heartbeat::{deliver, with_heartbeat, HEARTBEAT};

use bytes::Bytes;
use serde::Serialize;

use crate::normalize::NormalizedResponse;

/// One wire unit: an optional event name and a data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub event: Option<String>,
    pub data: String,
}

impl StreamFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn event(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            data: data.into(),
        }
    }

    /// Exact SSE text of the frame, terminated by a blank line.
    pub fn to_wire(&self) -> String {
        match &self.event {
            Some(name) => format!("event: {name}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }

    /// The whole frame as one buffer, so it is written in a single piece.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    /// Characters of content per delta frame. Zero is treated as one.
    pub chunk_chars: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { chunk_chars: 24 }
    }
}

/// Frames for `response` in the order the protocol requires.
pub fn emit<'a>(
    response: &'a NormalizedResponse,
    protocol: Protocol,
    options: EmitOptions,
) -> Box<dyn Iterator<Item = StreamFrame> + Send + 'a> {
    match protocol {
        Protocol::OpenAi => Box::new(openai::frames(response, options)),
        Protocol::Anthropic => Box::new(anthropic::frames(response, options)),
    }
}

/// Split `text` into pieces of at most `chunk_chars` characters, never inside
/// a UTF-8 sequence.
pub fn chunk_text(text: &str, chunk_chars: usize) -> impl Iterator<Item = &str> + '_ {
    let size = chunk_chars.max(1);
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let split = rest.char_indices().nth(size).map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(split);
        rest = tail;
        Some(head)
    })
}

fn json_data<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

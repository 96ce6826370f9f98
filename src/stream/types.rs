// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Upstream delta frames as they arrive on the wire, per-index tool-call
// fragments, finish reasons and errors.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Upstream input
// ---------------------------------------------------------------------------

/// Raw upstream body. Transport errors are already rendered to text.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// What the translation task reads from.
pub enum UpstreamInput {
    Stream(UpstreamStream),
    /// Connect failure or non-2xx status. The client still gets a well-formed
    /// stream ending in the sentinel.
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Upstream delta frames
// ---------------------------------------------------------------------------

/// One `data:` payload of an OpenAI-style `chat.completion.chunk`.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkFrame {
    #[serde(default)]
    pub choices: Vec<ChoiceDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceDelta {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Older servers name the reasoning channel `reasoning`.
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl Delta {
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    /// Normally a string piece; some servers send a whole object at once.
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl FunctionDelta {
    pub fn arguments_text(&self) -> Option<String> {
        match &self.arguments {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Finish reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// `tool_calls` / `tool_call`: close fragments, keep reading.
    ToolCalls,
    Length,
    /// `stop` or anything else the upstream reports.
    Stop(String),
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "tool_calls" | "tool_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            other => FinishReason::Stop(other.to_string()),
        }
    }

    /// Reason carried downstream on the last content chunk.
    pub fn downstream(&self) -> &'static str {
        match self {
            FinishReason::Length => "length",
            _ => "stop",
        }
    }
}

// ---------------------------------------------------------------------------
// Tool call fragments
// ---------------------------------------------------------------------------

/// Maximum argument text kept per fragment, in bytes.
pub const MAX_FRAGMENT_ARGUMENT_BYTES: usize = 1_048_576; // 1 MB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Open,
    Closed,
}

/// A tool call being rebuilt from deltas for one index.
///
/// Name pieces and argument pieces are concatenated as raw text; the
/// arguments are parsed once, after the fragment closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
    pub state: FragmentState,
    /// Argument text hit the size cap and was cut.
    pub truncated: bool,
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: None,
            name: String::new(),
            arguments: String::new(),
            state: FragmentState::Open,
            truncated: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == FragmentState::Open
    }

    pub fn append_name(&mut self, piece: &str) {
        self.name.push_str(piece);
    }

    /// Append argument text up to `limit` bytes total. Returns false when
    /// anything was dropped. Cuts on a char boundary.
    pub fn append_arguments(&mut self, piece: &str, limit: usize) -> bool {
        if self.truncated {
            return piece.is_empty();
        }
        let room = limit.saturating_sub(self.arguments.len());
        if piece.len() <= room {
            self.arguments.push_str(piece);
            return true;
        }
        let mut cut = room;
        while !piece.is_char_boundary(cut) {
            cut -= 1;
        }
        self.arguments.push_str(&piece[..cut]);
        self.truncated = true;
        false
    }

    pub fn close(&mut self) {
        self.state = FragmentState::Closed;
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The downstream receiver is gone.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("failed to encode chunk: {0}")]
    Encode(#[from] serde_json::Error),
}

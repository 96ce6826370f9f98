// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Inbound chat request representation
//
// The shim never rebuilds the request from typed structs: the original JSON
// object is kept as-is and only the fields the policy touches are rewritten.
// `Message` is a read-only projection of `messages[]` used for mode
// detection and the condense trigger.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agent mode for the current turn, derived once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Plan,
    Act,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Plan => f.write_str("PLAN"),
            Mode::Act => f.write_str("ACT"),
        }
    }
}

/// The role of a message participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    /// Any role the shim has no use for ("developer", "function", ...).
    Other(String),
}

impl Role {
    pub fn parse(role: &str) -> Self {
        match role {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }
}

/// A single message, reduced to its role and flattened text.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Why an inbound body was refused. Each maps to a 400.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("messages must be an array")]
    MessagesNotArray,
}

/// A validated inbound chat-completions request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// The original JSON object, field order preserved.
    pub body: Map<String, Value>,
    pub messages: Vec<Message>,
}

impl InboundRequest {
    /// Parse and validate a raw request body.
    pub fn parse(bytes: &[u8]) -> Result<Self, RequestError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(RequestError::EmptyBody);
        }
        let root: Value =
            serde_json::from_slice(bytes).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
        let Value::Object(body) = root else {
            return Err(RequestError::NotAnObject);
        };
        let messages = match body.get("messages") {
            Some(Value::Array(items)) => items.iter().filter_map(parse_message).collect(),
            _ => return Err(RequestError::MessagesNotArray),
        };
        Ok(Self { body, messages })
    }

    /// `stream: true` in the request. Absent means non-streaming.
    pub fn is_stream(&self) -> bool {
        self.body.get("stream").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn model(&self) -> Option<&str> {
        self.body.get("model").and_then(Value::as_str)
    }

    /// `tools` is present and non-empty.
    pub fn has_tools(&self) -> bool {
        matches!(self.body.get("tools"), Some(Value::Array(tools)) if !tools.is_empty())
    }

    /// The most recent message with the given role.
    pub fn latest(&self, role: &Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| &m.role == role)
    }
}

/// Project one `messages[]` entry. Entries without a string role are skipped;
/// they are still forwarded untouched as part of the body.
fn parse_message(value: &Value) -> Option<Message> {
    let role = value.get("role")?.as_str()?;
    Some(Message::new(Role::parse(role), flatten_content(value.get("content"))))
}

/// Flatten `content` to text: a string as-is, an array of parts joined by
/// newlines (only `text` parts count), anything else empty.
pub fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

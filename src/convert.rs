// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Tool call converter
//
// Turns one closed tool-call fragment (name + raw argument text) into the
// client's inline XML grammar:
//   <tool><k1>v1</k1><k2>v2</k2></tool>
// Unknown names are routed to the `use_mcp_tool` envelope, emitted as a
// literal tag, or rejected, depending on the conversion policy.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ConversionConfig;
use crate::tables::{NameResolution, ToolTables};

pub const MCP_WRAPPER_TOOL: &str = "use_mcp_tool";
pub const UNKNOWN_SERVER_NAME: &str = "unknown";

/// How a tool name was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRoute {
    /// Known tool or alias, rendered as its own element.
    Direct,
    /// Browser-like name wrapped in `use_mcp_tool`.
    Browser,
    /// Unknown name wrapped in `use_mcp_tool` with `server_name=unknown`.
    UnknownMcp,
    /// Unknown name emitted as a tag named after itself.
    Literal,
}

/// Exactly one outcome per closed fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Xml {
        tool: String,
        route: ToolRoute,
        xml: String,
    },
    Rejected {
        name: String,
        text: String,
    },
}

impl ConversionOutcome {
    /// The text written downstream for this outcome.
    pub fn text(&self) -> &str {
        match self {
            ConversionOutcome::Xml { xml, .. } => xml,
            ConversionOutcome::Rejected { text, .. } => text,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ConversionOutcome::Rejected { .. })
    }
}

/// Escape `&`, `<` and `>` for element text.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Argument text after the single terminal parse.
#[derive(Debug, Clone, PartialEq)]
enum Arguments {
    Object(Map<String, Value>),
    /// Not a JSON object; rendered verbatim inside the tool element.
    Raw(String),
}

fn parse_arguments(tool: &str, raw: &str) -> Arguments {
    if raw.trim().is_empty() {
        return Arguments::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Arguments::Object(map),
        Ok(_) => Arguments::Raw(raw.to_string()),
        Err(e) => {
            tracing::warn!(tool, error = %e, "tool arguments are not valid JSON; passing raw text");
            Arguments::Raw(raw.to_string())
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => xml_escape(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => xml_escape(&value.to_string()),
    }
}

fn render_element(tag: &str, args: &Arguments) -> String {
    let mut out = format!("<{tag}>");
    match args {
        Arguments::Object(map) => {
            for (key, value) in map {
                out.push_str(&format!("<{key}>{}</{key}>", render_value(value)));
            }
        }
        Arguments::Raw(raw) => out.push_str(&xml_escape(raw)),
    }
    out.push_str(&format!("</{tag}>"));
    out
}

fn render_mcp(server_name: &str, tool_name: &str, raw_args: &str) -> String {
    let args = if raw_args.trim().is_empty() { "{}" } else { raw_args };
    format!(
        "<{MCP_WRAPPER_TOOL}><server_name>{}</server_name><tool_name>{}</tool_name><arguments>{}</arguments></{MCP_WRAPPER_TOOL}>",
        xml_escape(server_name),
        xml_escape(tool_name),
        xml_escape(args),
    )
}

pub fn rejection_text(name: &str) -> String {
    format!("[tool call rejected: unknown tool \"{name}\" (strict-xml)]")
}

/// Converts closed tool calls using the shared tables and conversion policy.
#[derive(Debug, Clone)]
pub struct ToolCallConverter {
    tables: Arc<ToolTables>,
    config: ConversionConfig,
}

impl ToolCallConverter {
    pub fn new(tables: Arc<ToolTables>, config: ConversionConfig) -> Self {
        Self { tables, config }
    }

    pub fn convert(&self, name: &str, raw_args: &str) -> ConversionOutcome {
        match self.tables.aliases.resolve(name) {
            NameResolution::Canonical(tool) => {
                let args = match parse_arguments(&tool, raw_args) {
                    Arguments::Object(map) => {
                        Arguments::Object(self.tables.synonyms.normalize(&tool, map))
                    }
                    raw => raw,
                };
                if tool != name {
                    tracing::debug!(alias = name, tool = %tool, "resolved tool alias");
                }
                let xml = render_element(&tool, &args);
                ConversionOutcome::Xml {
                    tool,
                    route: ToolRoute::Direct,
                    xml,
                }
            }
            NameResolution::Browser => {
                tracing::info!(
                    tool = name,
                    server = %self.config.browser_server_name,
                    "browser-like tool routed to use_mcp_tool"
                );
                ConversionOutcome::Xml {
                    tool: MCP_WRAPPER_TOOL.to_string(),
                    route: ToolRoute::Browser,
                    xml: render_mcp(&self.config.browser_server_name, name, raw_args),
                }
            }
            NameResolution::Unresolved if self.config.strict_xml => {
                tracing::warn!(tool = name, "unknown tool rejected (strict-xml)");
                ConversionOutcome::Rejected {
                    name: name.to_string(),
                    text: rejection_text(name),
                }
            }
            NameResolution::Unresolved if self.config.allow_unknown_as_mcp => {
                tracing::warn!(tool = name, "unknown tool wrapped in use_mcp_tool");
                ConversionOutcome::Xml {
                    tool: MCP_WRAPPER_TOOL.to_string(),
                    route: ToolRoute::UnknownMcp,
                    xml: render_mcp(UNKNOWN_SERVER_NAME, name, raw_args),
                }
            }
            NameResolution::Unresolved => {
                tracing::warn!(tool = name, "unknown tool emitted as literal tag");
                let xml = render_element(name, &parse_arguments(name, raw_args));
                ConversionOutcome::Xml {
                    tool: name.to_string(),
                    route: ToolRoute::Literal,
                    xml,
                }
            }
        }
    }
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::message::Mode;
use crate::tables::ToolTables;

use super::pattern::CompiledPattern;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated shim configuration. Immutable after load and shared
/// by every session through `Arc<Config>`.
#[derive(Debug)]
pub struct Config {
    /// Config schema version. Always "v1".
    pub version: String,
    pub upstream: UpstreamConfig,
    pub request: RequestPolicyConfig,
    pub mode_detection: ModeDetection,
    pub conversion: ConversionConfig,
    /// Alias, synonym and known-tool tables.
    pub tables: Arc<ToolTables>,
    pub fallback: FallbackConfig,
    pub emitter: EmitterConfig,
    pub observability: ObservabilityConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8081";
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MODEL: &str = "gpt-oss";

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the inference server, without trailing slash.
    pub base_url: String,
    /// Timeout for establishing the upstream response (headers).
    pub timeout_ms: Option<u64>,
    /// Longest gap tolerated between two upstream stream items.
    pub idle_timeout_ms: u64,
    /// Model name reported downstream when the request names none.
    pub model: String,
}

impl UpstreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_ms: None,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request policy
// ---------------------------------------------------------------------------

/// One sampling entry: either force a value or remove the key.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideAction {
    Set(serde_json::Value),
    Drop,
}

/// Ordered sampling entries, as written in the config.
pub type SamplingOverrides = Vec<(String, OverrideAction)>;

/// Per-mode policy layered over the global request policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModePolicy {
    pub sampling: SamplingOverrides,
    pub reasoning_effort: Option<String>,
    pub force_tool_calls: Option<bool>,
}

/// Lookup table from `Mode` to its policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeTable {
    pub plan: ModePolicy,
    pub act: ModePolicy,
}

impl ModeTable {
    pub fn get(&self, mode: Mode) -> &ModePolicy {
        match mode {
            Mode::Plan => &self.plan,
            Mode::Act => &self.act,
        }
    }
}

pub const DEFAULT_REASONING_FORMAT: &str = "deepseek";
pub const DEFAULT_CONDENSE_TRIGGER: &str = "<explicit_instructions type=\"condense\">";
pub const DEFAULT_CONDENSE_TOOL: &str = "condense";

#[derive(Debug, Clone)]
pub struct RequestPolicyConfig {
    /// Remove client-supplied sampling keys before applying overrides.
    pub strip_client_sampling: bool,
    /// Keys treated as sampling parameters.
    pub client_sampling_keys: Vec<String>,
    /// Inject `cache_prompt=true`.
    pub cache_prompt: bool,
    /// Value of the injected `reasoning_format` directive. `None` disables it.
    pub reasoning_format: Option<String>,
    /// Global reasoning effort; a mode value takes precedence.
    pub reasoning_effort: Option<String>,
    pub force_tool_calls: bool,
    pub force_tool_choice_none: bool,
    /// Phrase in the latest user message that forces the condense tool.
    pub condense_trigger: Option<String>,
    pub condense_tool: String,
    /// Base sampling set, applied before the mode's overrides.
    pub sampling: SamplingOverrides,
    pub modes: ModeTable,
}

// ---------------------------------------------------------------------------
// Mode detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModeDetection {
    pub plan_marker: CompiledPattern,
    pub act_marker: CompiledPattern,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub const DEFAULT_BROWSER_SERVER: &str = "browser";

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Reject unknown tools instead of wrapping them.
    pub strict_xml: bool,
    /// Lenient mode: wrap unknown tools in `use_mcp_tool` (true) or emit them
    /// as a literal tag (false).
    pub allow_unknown_as_mcp: bool,
    /// MCP server name used for browser-like tool names.
    pub browser_server_name: String,
}

// ---------------------------------------------------------------------------
// Fallback, emitter, observability
// ---------------------------------------------------------------------------

pub const DEFAULT_CLARIFICATION_QUESTION: &str = "The upstream model returned no content this turn. \
Would you like me to try again, adjust model settings, or proceed with a follow-up question?";

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub promote_reasoning: bool,
    pub synthesize_empty_xml: bool,
    pub clarification_question: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            promote_reasoning: false,
            synthesize_empty_xml: false,
            clarification_question: DEFAULT_CLARIFICATION_QUESTION.to_string(),
        }
    }
}

pub const DEFAULT_FLUSH_BYTES: usize = 256;

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Pending plain content is flushed once it reaches this many bytes.
    pub flush_bytes: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            flush_bytes: DEFAULT_FLUSH_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    pub log_body: bool,
    pub trace_stream: bool,
    pub log_reasoning: bool,
    pub dump_upstream: Option<PathBuf>,
    pub dump_downstream: Option<PathBuf>,
}

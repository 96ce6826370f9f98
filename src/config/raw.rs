// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
//
// Kept apart from the public `Config` because the public side holds compiled
// regexes and resolved tables, and because defaults are merged and env
// variables expanded between the two.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub shim: String,
    pub upstream: Option<RawUpstream>,
    pub request: Option<RawRequest>,
    pub mode_detection: Option<RawModeDetection>,
    pub conversion: Option<RawConversion>,
    pub fallback: Option<RawFallback>,
    pub emitter: Option<RawEmitter>,
    pub observability: Option<RawObservability>,
    /// If false, skip the embedded tool tables. Default: true.
    pub use_default_tables: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUpstream {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub model: Option<String>,
}

/// Sampling entries keep YAML values so `null` can mean "drop". The mapping
/// keeps document order.
pub type RawSampling = serde_yaml::Mapping;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRequest {
    pub strip_client_sampling: Option<bool>,
    pub client_sampling_keys: Option<Vec<String>>,
    pub cache_prompt: Option<bool>,
    pub reasoning_format: Option<String>,
    pub reasoning_effort: Option<String>,
    pub force_tool_calls: Option<bool>,
    pub force_tool_choice_none: Option<bool>,
    pub condense_trigger: Option<String>,
    pub condense_tool: Option<String>,
    #[serde(default)]
    pub sampling: RawSampling,
    pub modes: Option<RawModes>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModes {
    pub plan: Option<RawModePolicy>,
    pub act: Option<RawModePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModePolicy {
    #[serde(default)]
    pub sampling: RawSampling,
    pub reasoning_effort: Option<String>,
    pub force_tool_calls: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModeDetection {
    pub plan_marker: Option<String>,
    pub act_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConversion {
    pub strict_xml: Option<bool>,
    pub allow_unknown_as_mcp: Option<bool>,
    pub browser_server_name: Option<String>,
    #[serde(default)]
    pub browser_patterns: Vec<String>,
    #[serde(default)]
    pub known_tools: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub argument_synonyms: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFallback {
    pub promote_reasoning: Option<bool>,
    pub synthesize_empty_xml: Option<bool>,
    pub clarification_question: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEmitter {
    pub flush_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawObservability {
    pub log_body: Option<bool>,
    pub trace_stream: Option<bool>,
    pub log_reasoning: Option<bool>,
    pub dump_upstream: Option<String>,
    pub dump_downstream: Option<String>,
}

/// Shape of `schema/defaults.yaml`.
#[derive(Debug, Deserialize)]
pub struct RawDefaults {
    pub known_tools: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub argument_synonyms: BTreeMap<String, BTreeMap<String, String>>,
    pub browser_patterns: Vec<String>,
    pub client_sampling_keys: Vec<String>,
    pub mode_detection: RawDefaultModeDetection,
}

#[derive(Debug, Deserialize)]
pub struct RawDefaultModeDetection {
    pub plan_marker: String,
    pub act_marker: String,
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Per-request session state and the turn summary built from it.
//
// A StreamSession is owned by the single task serving its request. The
// visibility flags are monotonic: once set they stay set.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::convert::ConversionOutcome;
use crate::message::Mode;
use crate::policy::{ForcedToolChoice, RewrittenRequest, SamplingPolicy};
use crate::stream::{DeltaAggregator, FallbackKind};

/// How the turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Upstream sent a non-tool finish reason.
    Finished,
    /// `[DONE]` or end of body without a finish reason.
    EndOfStream,
    IdleTimeout,
    /// Transport error in the middle of the body.
    UpstreamError,
    /// Connect failure or non-2xx status before any body was read.
    UpstreamUnavailable,
    ClientDisconnected,
    /// Non-streaming request answered in one piece.
    Complete,
}

pub struct StreamSession {
    pub request_id: String,
    pub model: String,
    pub mode: Mode,
    pub sampling: SamplingPolicy,
    pub stream: bool,
    pub tools_injected: bool,
    pub cache_prompt: bool,
    pub reasoning_effort: Option<String>,
    pub forced_tool_choice: Option<ForcedToolChoice>,
    pub aggregator: DeltaAggregator,
    content_emitted: bool,
    xml_emitted: bool,
    xml_converted: usize,
    rejected_calls: usize,
    fallback: Option<FallbackKind>,
    started: Instant,
}

impl StreamSession {
    pub fn new(request_id: impl Into<String>, request: &RewrittenRequest) -> Self {
        Self {
            request_id: request_id.into(),
            model: request.model.clone(),
            mode: request.mode,
            sampling: request.sampling.clone(),
            stream: request.stream,
            tools_injected: request.tools_injected,
            cache_prompt: request.cache_prompt,
            reasoning_effort: request.reasoning_effort.clone(),
            forced_tool_choice: request.forced_tool_choice,
            aggregator: DeltaAggregator::new(),
            content_emitted: false,
            xml_emitted: false,
            xml_converted: 0,
            rejected_calls: 0,
            fallback: None,
            started: Instant::now(),
        }
    }

    pub fn mark_content(&mut self) {
        self.content_emitted = true;
    }

    /// Count one conversion outcome. A rejection is visible text, so it sets
    /// `content_emitted`.
    pub fn record_outcome(&mut self, outcome: &ConversionOutcome) {
        match outcome {
            ConversionOutcome::Xml { .. } => {
                self.xml_emitted = true;
                self.xml_converted += 1;
            }
            ConversionOutcome::Rejected { .. } => {
                self.content_emitted = true;
                self.rejected_calls += 1;
            }
        }
    }

    pub fn record_fallback(&mut self, kind: FallbackKind) {
        self.fallback = Some(kind);
        self.content_emitted = true;
    }

    pub fn content_emitted(&self) -> bool {
        self.content_emitted
    }

    pub fn xml_emitted(&self) -> bool {
        self.xml_emitted
    }

    /// Nothing visible was produced this turn.
    pub fn needs_fallback(&self) -> bool {
        !self.content_emitted && !self.xml_emitted
    }

    pub fn summary(&self, termination: Termination, config_hash: &str) -> TurnSummary {
        TurnSummary {
            request_id: self.request_id.clone(),
            config_hash: config_hash.to_string(),
            model: self.model.clone(),
            mode: self.mode,
            stream: self.stream,
            sampling: self.sampling.snapshot(),
            tools_injected: self.tools_injected,
            forced_tool_choice: self.forced_tool_choice,
            xml_converted: self.xml_converted,
            rejected_calls: self.rejected_calls,
            content_emitted: self.content_emitted,
            fallback: self.fallback,
            cache_prompt: self.cache_prompt,
            reasoning_effort: self.reasoning_effort.clone(),
            termination,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// One structured record per served request.
#[derive(Debug, Clone, Serialize)]
pub struct TurnSummary {
    pub request_id: String,
    pub config_hash: String,
    pub model: String,
    pub mode: Mode,
    pub stream: bool,
    pub sampling: Value,
    pub tools_injected: bool,
    pub forced_tool_choice: Option<ForcedToolChoice>,
    pub xml_converted: usize,
    pub rejected_calls: usize,
    pub content_emitted: bool,
    pub fallback: Option<FallbackKind>,
    pub cache_prompt: bool,
    pub reasoning_effort: Option<String>,
    pub termination: Termination,
    pub duration_ms: u64,
}

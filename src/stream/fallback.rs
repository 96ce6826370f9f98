// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Fallback synthesizer: what to show when a turn ends with nothing visible.

use serde::Serialize;

use crate::config::FallbackConfig;
use crate::convert::xml_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    PromotedReasoning,
    ClarificationXml,
}

/// The fixed `ask_followup_question` block.
pub fn clarification_xml(question: &str) -> String {
    format!(
        "<ask_followup_question><question>{}</question></ask_followup_question>",
        xml_escape(question)
    )
}

/// Pick the fallback text for an empty turn, if the config allows one.
/// The caller checks that nothing visible was emitted.
pub fn synthesize(config: &FallbackConfig, reasoning: &str) -> Option<(FallbackKind, String)> {
    if config.promote_reasoning && !reasoning.trim().is_empty() {
        tracing::warn!("promoting reasoning to content (empty turn)");
        return Some((FallbackKind::PromotedReasoning, reasoning.to_string()));
    }
    if config.synthesize_empty_xml {
        tracing::warn!("synthesizing ask_followup_question (empty turn)");
        return Some((
            FallbackKind::ClarificationXml,
            clarification_xml(&config.clarification_question),
        ));
    }
    None
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Delta aggregator
//
// Per-session state rebuilt from upstream frames:
// - tool-call fragments keyed by index (BTreeMap, so closing walks indices
//   in ascending order)
// - the reasoning buffer, kept for the fallback synthesizer
// - a running count of content bytes (content itself goes straight to the
//   emitter)

use std::collections::BTreeMap;

use super::types::{ChunkFrame, FinishReason, ToolCallFragment, MAX_FRAGMENT_ARGUMENT_BYTES};

/// What one frame changed, in the order the caller must act on it:
/// content first, then closed fragments, then the finish reason.
#[derive(Debug, Default, PartialEq)]
pub struct FrameUpdate {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    /// Fragments closed by a `tool_calls` finish, ascending index.
    pub closed: Vec<ToolCallFragment>,
    /// Any finish reason other than `tool_calls`. The caller finalizes.
    pub finish: Option<FinishReason>,
}

#[derive(Debug)]
pub struct DeltaAggregator {
    fragments: BTreeMap<usize, ToolCallFragment>,
    reasoning: String,
    content_bytes: usize,
    argument_limit: usize,
}

impl Default for DeltaAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::with_argument_limit(MAX_FRAGMENT_ARGUMENT_BYTES)
    }

    pub fn with_argument_limit(argument_limit: usize) -> Self {
        Self {
            fragments: BTreeMap::new(),
            reasoning: String::new(),
            content_bytes: 0,
            argument_limit,
        }
    }

    /// Apply one upstream frame. Only the first choice is read.
    pub fn apply(&mut self, frame: ChunkFrame) -> FrameUpdate {
        let mut update = FrameUpdate::default();
        let Some(choice) = frame.choices.into_iter().next() else {
            return update;
        };

        if let Some(delta) = choice.delta {
            if let Some(reasoning) = delta.reasoning_text() {
                self.reasoning.push_str(reasoning);
                update.reasoning = Some(reasoning.to_string());
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                self.content_bytes += content.len();
                update.content = Some(content);
            }
            for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
                let index = call.index.unwrap_or(position);
                let fragment = self
                    .fragments
                    .entry(index)
                    .or_insert_with(|| ToolCallFragment::new(index));
                if !fragment.is_open() {
                    tracing::warn!(index, "tool call delta for a closed index ignored");
                    continue;
                }
                if fragment.id.is_none() {
                    fragment.id = call.id;
                }
                let Some(function) = call.function else {
                    continue;
                };
                if let Some(name) = &function.name {
                    fragment.append_name(name);
                }
                if let Some(args) = function.arguments_text() {
                    if !fragment.append_arguments(&args, self.argument_limit) && !args.is_empty() {
                        tracing::warn!(
                            index,
                            tool = %fragment.name,
                            limit = self.argument_limit,
                            "tool call arguments exceed limit; excess dropped"
                        );
                    }
                }
            }
        }

        match choice.finish_reason.as_deref().map(FinishReason::parse) {
            Some(FinishReason::ToolCalls) => update.closed = self.close_all(),
            Some(other) => update.finish = Some(other),
            None => {}
        }
        update
    }

    /// Close every open fragment, returning them in ascending index order.
    /// Already-closed fragments are not returned again.
    pub fn close_all(&mut self) -> Vec<ToolCallFragment> {
        self.fragments
            .values_mut()
            .filter(|f| f.is_open())
            .map(|f| {
                f.close();
                f.clone()
            })
            .collect()
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn content_bytes(&self) -> usize {
        self.content_bytes
    }

    pub fn open_count(&self) -> usize {
        self.fragments.values().filter(|f| f.is_open()).count()
    }
}

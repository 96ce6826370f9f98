// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Streaming translation engine
//
// Upstream SSE (structured tool_calls + reasoning channel) in, client SSE
// (inline XML tool tags in content) out:
// - reader: byte stream -> lines -> frames
// - aggregator: per-index tool-call fragments, reasoning buffer
// - fallback: content for turns that produced nothing visible
// - emitter: chunk envelopes, flush policy, exactly-once sentinel
// - processor: the per-request task tying them together

mod aggregator;
mod emitter;
mod fallback;
mod processor;
mod reader;
mod types;

pub use aggregator::{DeltaAggregator, FrameUpdate};
pub use emitter::{Emitter, DONE_FRAME};
pub use fallback::{clarification_xml, synthesize as synthesize_fallback, FallbackKind};
pub use processor::StreamTranslator;
pub use reader::{classify_line, SseDecoder, SseEvent};
pub use types::{
    ChunkFrame, FinishReason, FragmentState, StreamError, ToolCallFragment, UpstreamInput,
    UpstreamStream, MAX_FRAGMENT_ARGUMENT_BYTES,
};

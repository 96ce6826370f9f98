// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Stream translator
//
// One spawned task per streaming request. The task reads the upstream body,
// feeds the aggregator, converts closed tool calls and writes client chunks
// through the emitter. Output goes through a bounded channel exposed as a
// byte stream for the response body.
//
// Exit paths and what the client sees:
// - finish_reason / [DONE] / end of body / idle timeout / transport error:
//   remaining fragments converted, pending content flushed, fallback, sentinel
// - upstream unavailable: role delta, fallback, sentinel
// - client gone: task ends at once, even mid-read, upstream body dropped

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::Config;
use crate::convert::ToolCallConverter;
use crate::observe::{FileTee, ObservabilitySink};
use crate::session::{StreamSession, Termination};

use super::emitter::Emitter;
use super::fallback;
use super::reader::{classify_line, SseDecoder, SseEvent};
use super::types::{ChunkFrame, FinishReason, StreamError, UpstreamInput, UpstreamStream};

/// Capacity of the downstream channel, in frames.
const CHANNEL_CAPACITY: usize = 64;

/// Shared collaborators for translation tasks.
#[derive(Clone)]
pub struct StreamTranslator {
    config: Arc<Config>,
    converter: ToolCallConverter,
    sink: Arc<dyn ObservabilitySink>,
}

impl StreamTranslator {
    pub fn new(config: Arc<Config>, sink: Arc<dyn ObservabilitySink>) -> Self {
        let converter = ToolCallConverter::new(config.tables.clone(), config.conversion.clone());
        Self {
            config,
            converter,
            sink,
        }
    }

    /// Spawn the translation task and return the client byte stream.
    pub fn spawn(&self, session: StreamSession, input: UpstreamInput) -> ReceiverStream<Bytes> {
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let observability = &self.config.observability;
        let emitter = Emitter::new(
            tx,
            format!("chatcmpl-{}", session.request_id),
            session.model.clone(),
            self.config.emitter.flush_bytes,
        )
        .with_tee(FileTee::open_optional(
            observability.dump_downstream.as_deref(),
            &session.request_id,
        ));
        let upstream_tee =
            FileTee::open_optional(observability.dump_upstream.as_deref(), &session.request_id);

        let mut task = Translation {
            config: self.config.clone(),
            converter: self.converter.clone(),
            session,
            emitter,
            upstream_tee,
        };
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let termination = match task.run(input).await {
                Ok(termination) => termination,
                Err(StreamError::ClientDisconnected) => {
                    tracing::info!(request_id = %task.session.request_id, "client disconnected; upstream dropped");
                    Termination::ClientDisconnected
                }
                Err(e) => {
                    tracing::error!(request_id = %task.session.request_id, error = %e, "stream translation failed");
                    Termination::UpstreamError
                }
            };
            let summary = task
                .session
                .summary(termination, &task.config.config_hash);
            sink.record_turn(&summary);
        });

        ReceiverStream::new(rx)
    }
}

/// State of one running translation task.
struct Translation {
    config: Arc<Config>,
    converter: ToolCallConverter,
    session: StreamSession,
    emitter: Emitter,
    upstream_tee: Option<FileTee>,
}

impl Translation {
    async fn run(&mut self, input: UpstreamInput) -> Result<Termination, StreamError> {
        self.emitter.start().await?;
        match input {
            UpstreamInput::Unavailable(reason) => {
                tracing::warn!(request_id = %self.session.request_id, reason = %reason, "upstream unavailable");
                self.finalize(None).await?;
                Ok(Termination::UpstreamUnavailable)
            }
            UpstreamInput::Stream(body) => self.pump(body).await,
        }
    }

    async fn pump(&mut self, mut body: UpstreamStream) -> Result<Termination, StreamError> {
        let idle = self.config.upstream.idle_timeout();
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.emitter.closed() => return Err(StreamError::ClientDisconnected),
                next = tokio::time::timeout(idle, body.next()) => next,
            };
            let bytes = match next {
                Err(_) => {
                    tracing::warn!(
                        request_id = %self.session.request_id,
                        idle_ms = idle.as_millis() as u64,
                        "upstream idle timeout"
                    );
                    self.finalize(None).await?;
                    return Ok(Termination::IdleTimeout);
                }
                Ok(None) => {
                    if let Some(tail) = decoder.finish() {
                        if let Some(termination) = self.handle_line(&tail).await? {
                            return Ok(termination);
                        }
                    }
                    self.finalize(None).await?;
                    return Ok(Termination::EndOfStream);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(request_id = %self.session.request_id, error = %e, "upstream stream error");
                    self.finalize(None).await?;
                    return Ok(Termination::UpstreamError);
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for line in decoder.push(&bytes) {
                if let Some(termination) = self.handle_line(&line).await? {
                    return Ok(termination);
                }
            }
        }
    }

    /// Handle one upstream line. Returns the termination once the session
    /// has been finalized.
    async fn handle_line(&mut self, line: &str) -> Result<Option<Termination>, StreamError> {
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(tee) = self.upstream_tee.as_mut() {
            tee.write_line(line);
        }
        if self.config.observability.trace_stream {
            let preview: String = line.chars().take(200).collect();
            tracing::debug!(request_id = %self.session.request_id, line = %preview, "upstream line");
        }

        let frame = match classify_line(line) {
            None => return Ok(None),
            Some(SseEvent::Done) => {
                self.finalize(None).await?;
                return Ok(Some(Termination::EndOfStream));
            }
            Some(SseEvent::Malformed(data)) => {
                tracing::warn!(request_id = %self.session.request_id, len = data.len(), "skipping malformed upstream frame");
                return Ok(None);
            }
            Some(SseEvent::Frame(value)) => match serde_json::from_value::<ChunkFrame>(value) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(request_id = %self.session.request_id, error = %e, "skipping unrecognized upstream frame");
                    return Ok(None);
                }
            },
        };

        let update = self.session.aggregator.apply(frame);

        if let Some(reasoning) = &update.reasoning {
            if self.config.observability.log_reasoning {
                tracing::debug!(request_id = %self.session.request_id, reasoning = %reasoning, "reasoning delta");
            }
        }
        if let Some(content) = &update.content {
            self.session.mark_content();
            self.emitter.push_content(content).await?;
        }
        for fragment in &update.closed {
            let outcome = self.converter.convert(&fragment.name, &fragment.arguments);
            self.session.record_outcome(&outcome);
            tracing::info!(
                request_id = %self.session.request_id,
                index = fragment.index,
                tool = %fragment.name,
                truncated = fragment.truncated,
                rejected = outcome.is_rejected(),
                "tool call converted"
            );
            self.emitter.send_block(outcome.text()).await?;
        }
        if let Some(reason) = update.finish {
            self.finalize(Some(reason)).await?;
            return Ok(Some(Termination::Finished));
        }
        Ok(None)
    }

    /// Close what is still open, run the fallback, write the last chunks and
    /// the sentinel.
    async fn finalize(&mut self, reason: Option<FinishReason>) -> Result<(), StreamError> {
        let mut blocks = Vec::new();
        for fragment in self.session.aggregator.close_all() {
            let outcome = self.converter.convert(&fragment.name, &fragment.arguments);
            self.session.record_outcome(&outcome);
            tracing::info!(
                request_id = %self.session.request_id,
                index = fragment.index,
                tool = %fragment.name,
                truncated = fragment.truncated,
                rejected = outcome.is_rejected(),
                "tool call converted at close"
            );
            blocks.push(outcome.text().to_string());
        }

        if self.session.needs_fallback() {
            if let Some((kind, text)) =
                fallback::synthesize(&self.config.fallback, self.session.aggregator.reasoning())
            {
                self.session.record_fallback(kind);
                blocks.push(text);
            }
        }

        let finish = reason.as_ref().map(FinishReason::downstream).unwrap_or("stop");
        self.emitter.finish(blocks, finish).await
    }
}

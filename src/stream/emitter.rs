// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Downstream emitter
//
// Writes `chat.completion.chunk` envelopes as `data: {json}\n\n` frames to
// the response channel. Guarantees:
// - the role-only delta goes out before anything else
// - plain content is coalesced until `flush_bytes` or a newline
// - an XML block is one chunk, preceded by any pending content
// - `data: [DONE]\n\n` is written exactly once, last

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::observe::FileTee;

use super::types::StreamError;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Serialize)]
struct ChunkEnvelope<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [ChunkChoice<'a>; 1],
}

#[derive(Serialize)]
struct ChunkChoice<'a> {
    index: u32,
    delta: ChunkDelta<'a>,
    finish_reason: Option<&'a str>,
}

#[derive(Serialize)]
struct ChunkDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

pub struct Emitter {
    tx: mpsc::Sender<Bytes>,
    id: String,
    model: String,
    created: i64,
    flush_bytes: usize,
    pending: String,
    role_sent: bool,
    done: bool,
    tee: Option<FileTee>,
}

impl Emitter {
    pub fn new(
        tx: mpsc::Sender<Bytes>,
        id: impl Into<String>,
        model: impl Into<String>,
        flush_bytes: usize,
    ) -> Self {
        Self {
            tx,
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            flush_bytes: flush_bytes.max(1),
            pending: String::new(),
            role_sent: false,
            done: false,
            tee: None,
        }
    }

    pub fn with_tee(mut self, tee: Option<FileTee>) -> Self {
        self.tee = tee;
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Resolves once the client side of the channel is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    async fn write(&mut self, frame: String) -> Result<(), StreamError> {
        if let Some(tee) = self.tee.as_mut() {
            tee.write_line(&frame);
        }
        self.tx
            .send(Bytes::from(frame))
            .await
            .map_err(|_| StreamError::ClientDisconnected)
    }

    async fn write_chunk(
        &mut self,
        role: Option<&'static str>,
        content: Option<&str>,
        finish_reason: Option<&str>,
    ) -> Result<(), StreamError> {
        let envelope = ChunkEnvelope {
            id: &self.id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: [ChunkChoice {
                index: 0,
                delta: ChunkDelta { role, content },
                finish_reason,
            }],
        };
        let frame = format!("data: {}\n\n", serde_json::to_string(&envelope)?);
        self.write(frame).await
    }

    /// Send the role-only delta if it has not gone out yet.
    pub async fn start(&mut self) -> Result<(), StreamError> {
        if self.role_sent {
            return Ok(());
        }
        self.role_sent = true;
        self.write_chunk(Some("assistant"), None, None).await
    }

    async fn send_content(&mut self, text: &str, finish_reason: Option<&str>) -> Result<(), StreamError> {
        self.start().await?;
        self.write_chunk(None, Some(text), finish_reason).await
    }

    /// Buffer plain content, flushing at the byte threshold or a newline.
    pub async fn push_content(&mut self, text: &str) -> Result<(), StreamError> {
        if text.is_empty() {
            return Ok(());
        }
        self.pending.push_str(text);
        if self.pending.len() >= self.flush_bytes || self.pending.contains('\n') {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StreamError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending);
        self.send_content(&text, None).await
    }

    /// Send one atomic block (converted XML, a rejection notice) after
    /// flushing pending content.
    pub async fn send_block(&mut self, block: &str) -> Result<(), StreamError> {
        self.flush().await?;
        if block.is_empty() {
            return Ok(());
        }
        self.send_content(block, None).await
    }

    /// Write pending content and the final blocks, the last of them carrying
    /// `finish_reason`, then the sentinel.
    pub async fn finish(&mut self, blocks: Vec<String>, finish_reason: &str) -> Result<(), StreamError> {
        self.start().await?;
        let mut texts = Vec::with_capacity(blocks.len() + 1);
        if !self.pending.is_empty() {
            texts.push(std::mem::take(&mut self.pending));
        }
        texts.extend(blocks.into_iter().filter(|b| !b.is_empty()));

        let last = texts.len().saturating_sub(1);
        for (i, text) in texts.iter().enumerate() {
            let reason = (i == last).then_some(finish_reason);
            self.send_content(text, reason).await?;
        }
        self.send_done().await
    }

    /// Write the sentinel. Later calls are no-ops.
    pub async fn send_done(&mut self) -> Result<(), StreamError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        self.write(DONE_FRAME.to_string()).await
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            let _ = self.tx.try_send(Bytes::from_static(DONE_FRAME.as_bytes()));
        }
    }
}

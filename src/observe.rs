// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Observability surface
//
// - ObservabilitySink: receives one TurnSummary per request
// - TracingSink: default sink, one structured `turn complete` event
// - FileTee: raw SSE line dump for upstream/downstream debugging

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::session::TurnSummary;

/// Receives the per-turn summary once a request has been fully served.
pub trait ObservabilitySink: Send + Sync {
    fn record_turn(&self, summary: &TurnSummary);
}

/// Logs each summary as a structured tracing event.
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record_turn(&self, s: &TurnSummary) {
        let sampling = s.sampling.to_string();
        tracing::info!(
            request_id = %s.request_id,
            config_hash = %s.config_hash,
            model = %s.model,
            mode = %s.mode,
            stream = s.stream,
            sampling = %sampling,
            tools_injected = s.tools_injected,
            forced_tool_choice = ?s.forced_tool_choice,
            xml_converted = s.xml_converted,
            rejected_calls = s.rejected_calls,
            content_emitted = s.content_emitted,
            fallback = ?s.fallback,
            cache_prompt = s.cache_prompt,
            reasoning_effort = s.reasoning_effort.as_deref().unwrap_or(""),
            termination = ?s.termination,
            duration_ms = s.duration_ms,
            "turn complete"
        );
    }
}

/// Appends raw SSE lines to a file, each prefixed with `[request_id] `.
///
/// Write failures are logged once and the tee goes quiet; they never affect
/// the stream being served.
pub struct FileTee {
    path: PathBuf,
    file: Option<File>,
    prefix: String,
}

impl FileTee {
    pub fn open(path: &Path, request_id: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            prefix: format!("[{request_id}] "),
        })
    }

    /// Open the tee if a path is configured. Failures are logged and yield
    /// no tee.
    pub fn open_optional(path: Option<&Path>, request_id: &str) -> Option<Self> {
        let path = path?;
        match Self::open(path, request_id) {
            Ok(tee) => Some(tee),
            Err(e) => {
                tracing::warn!(request_id, path = %path.display(), error = %e, "cannot open tee file");
                None
            }
        }
    }

    /// Write one line. A trailing newline is added if missing.
    pub fn write_line(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let newline = if line.ends_with('\n') { "" } else { "\n" };
        let record = format!("{}{line}{newline}", self.prefix);
        if let Err(e) = file.write_all(record.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "tee write failed; disabling");
            self.file = None;
        }
    }
}

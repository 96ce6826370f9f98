// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Engine integration
//
// Wires the request path together:
// - Parse and validate the inbound request
// - Rewrite it (mode, sampling, injected directives, tool choice)
// - Forward to the inference server
// - Streaming: hand the upstream body to the StreamTranslator
// - Non-streaming: convert choices[0].message tool calls to inline XML

use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::Read as _;

use crate::config::Config;
use crate::convert::ToolCallConverter;
use crate::message::InboundRequest;
use crate::observe::{ObservabilitySink, TracingSink};
use crate::policy::{rewrite_request, RewrittenRequest};
use crate::proxy::{ProxyError, ProxyRequest, ProxyResponse, UpstreamClient};
use crate::session::{StreamSession, Termination};
use crate::stream::{synthesize_fallback, StreamTranslator, UpstreamInput, UpstreamStream};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Longest rewritten body logged when `log_body` is on, in chars.
const LOG_BODY_MAX_CHARS: usize = 2000;

/// Request headers never forwarded upstream. reqwest sets its own host and
/// length; the shim must be able to read the non-streaming body.
const DROPPED_REQUEST_HEADERS: [header::HeaderName; 3] =
    [header::HOST, header::CONTENT_LENGTH, header::ACCEPT_ENCODING];

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the inference server.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Time allowed until the response headers arrive.
    pub timeout_ms: Option<u64>,
    pub stream: bool,
}

pub enum HttpBody {
    Full(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>),
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

impl From<HttpError> for ProxyError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub sink: Arc<dyn ObservabilitySink>,
}

// ---------------------------------------------------------------------------
// EngineUpstreamClient
// ---------------------------------------------------------------------------

/// Upstream client that runs the full shim pipeline.
pub struct EngineUpstreamClient {
    deps: EngineDeps,
    converter: ToolCallConverter,
    translator: StreamTranslator,
}

impl EngineUpstreamClient {
    pub fn new_with(deps: EngineDeps) -> Self {
        let converter =
            ToolCallConverter::new(deps.config.tables.clone(), deps.config.conversion.clone());
        let translator = StreamTranslator::new(deps.config.clone(), deps.sink.clone());
        Self {
            deps,
            converter,
            translator,
        }
    }
}

#[async_trait]
impl UpstreamClient for EngineUpstreamClient {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let config = &self.deps.config;

        // 1) Parse; a malformed request never reaches upstream
        let inbound = InboundRequest::parse(&request.body)?;
        let request_id = Uuid::new_v4().to_string();

        // 2) Rewrite
        let rewritten = rewrite_request(inbound, config);
        let body = rewritten
            .to_bytes()
            .map_err(|e| ProxyError::Internal(format!("cannot encode rewritten request: {e}")))?;

        tracing::info!(
            request_id = %request_id,
            model = %rewritten.model,
            mode = %rewritten.mode,
            stream = rewritten.stream,
            tools_injected = rewritten.tools_injected,
            forced_tool_choice = ?rewritten.forced_tool_choice,
            "request rewritten"
        );
        if config.observability.log_body {
            let text = String::from_utf8_lossy(&body);
            let preview: String = text.chars().take(LOG_BODY_MAX_CHARS).collect();
            tracing::debug!(request_id = %request_id, body = %preview, "rewritten request body");
        }

        // 3) Forward
        let http_req = HttpRequest {
            method: Method::POST,
            url: config.upstream.chat_completions_url(),
            headers: forward_headers(&request.headers),
            body: Bytes::from(body),
            timeout_ms: config.upstream.timeout_ms,
            stream: rewritten.stream,
        };
        let session = StreamSession::new(request_id, &rewritten);

        if rewritten.stream {
            Ok(self.handle_streaming(session, http_req).await)
        } else {
            self.handle_non_streaming(session, &rewritten, http_req).await
        }
    }
}

impl EngineUpstreamClient {
    /// Always answers with an event stream. Upstream failures before the
    /// first byte become a fallback-only stream.
    async fn handle_streaming(&self, session: StreamSession, http_req: HttpRequest) -> ProxyResponse {
        let input = match self.deps.http.send(http_req).await {
            Err(e) => UpstreamInput::Unavailable(e.to_string()),
            Ok(resp) if !resp.status.is_success() => {
                UpstreamInput::Unavailable(format!("upstream returned {}", resp.status))
            }
            Ok(resp) => {
                if is_gzip(&resp.headers) || is_deflate(&resp.headers) {
                    tracing::warn!(
                        request_id = %session.request_id,
                        "streaming response has Content-Encoding; reading as-is"
                    );
                }
                let body: UpstreamStream = match resp.body {
                    HttpBody::Full(bytes) => {
                        Box::pin(futures_util::stream::once(async move { Ok::<_, String>(bytes) }))
                    }
                    HttpBody::Stream(s) => Box::pin(s.map_err(|e| e.to_string())),
                };
                UpstreamInput::Stream(body)
            }
        };

        let frames = self.translator.spawn(session, input);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        ProxyResponse {
            status: StatusCode::OK,
            headers,
            body: Body::from_stream(frames.map(Ok::<_, Infallible>)),
        }
    }

    async fn handle_non_streaming(
        &self,
        mut session: StreamSession,
        rewritten: &RewrittenRequest,
        http_req: HttpRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let upstream = self.deps.http.send(http_req).await?;
        let status = upstream.status;
        let mut resp_headers = upstream.headers;

        let body_bytes = match upstream.body {
            HttpBody::Full(b) => b,
            HttpBody::Stream(mut s) => {
                let mut collected = Vec::new();
                while let Some(chunk) = s.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                Bytes::from(collected)
            }
        };
        let body_bytes = maybe_decompress(&mut resp_headers, body_bytes)?;
        strip_hop_headers(&mut resp_headers);

        if !status.is_success() {
            tracing::warn!(request_id = %session.request_id, %status, "upstream error status passed through");
            self.record(&session, Termination::Complete);
            return Ok(ProxyResponse {
                status,
                headers: resp_headers,
                body: Body::from(body_bytes),
            });
        }

        let mut json: Value = match serde_json::from_slice(&body_bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(request_id = %session.request_id, error = %e, "upstream body is not JSON");
                self.record(&session, Termination::Complete);
                return Ok(ProxyResponse::from_bytes(
                    StatusCode::BAD_GATEWAY,
                    &br#"{"error":"bad_upstream_json"}"#[..],
                ));
            }
        };

        if json.get("model").is_none() {
            if let Some(obj) = json.as_object_mut() {
                obj.insert("model".into(), Value::String(rewritten.model.clone()));
            }
        }
        if let Some(choice) = json
            .get_mut("choices")
            .and_then(|c| c.get_mut(0))
            .and_then(Value::as_object_mut)
        {
            self.rewrite_choice(choice, &mut session);
        }

        let body = serde_json::to_vec(&json)
            .map_err(|e| ProxyError::Internal(format!("cannot encode response: {e}")))?;
        resp_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.record(&session, Termination::Complete);
        Ok(ProxyResponse {
            status,
            headers: resp_headers,
            body: Body::from(body),
        })
    }

    /// Replace structured tool calls in one choice with inline XML appended
    /// to `content`, and apply the fallback when the message is empty.
    fn rewrite_choice(&self, choice: &mut Map<String, Value>, session: &mut StreamSession) {
        let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) else {
            return;
        };

        let mut content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !content.is_empty() {
            session.mark_content();
        }

        let mut changed = false;
        if let Some(Value::Array(calls)) = message.shift_remove("tool_calls") {
            for call in &calls {
                let function = call.get("function");
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let arguments = match function.and_then(|f| f.get("arguments")) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                let outcome = self.converter.convert(name, &arguments);
                session.record_outcome(&outcome);
                tracing::info!(
                    request_id = %session.request_id,
                    tool = %name,
                    rejected = outcome.is_rejected(),
                    "tool call converted"
                );
                content.push_str(outcome.text());
                changed = true;
            }
        }

        if session.needs_fallback() {
            let reasoning = ["reasoning_content", "reasoning"]
                .iter()
                .find_map(|key| message.get(*key).and_then(Value::as_str))
                .unwrap_or_default();
            if let Some((kind, text)) = synthesize_fallback(&self.deps.config.fallback, reasoning) {
                session.record_fallback(kind);
                content.push_str(&text);
                changed = true;
            }
        }

        // The client only ever sees role and content, as on the streaming path.
        let role = message
            .get("role")
            .cloned()
            .unwrap_or_else(|| Value::String("assistant".into()));
        let content = if changed {
            Value::String(content)
        } else {
            message.get("content").cloned().unwrap_or(Value::Null)
        };
        *message = Map::from_iter([("role".to_string(), role), ("content".to_string(), content)]);

        if changed {
            if choice.get("finish_reason").and_then(Value::as_str) == Some("tool_calls") {
                choice.insert("finish_reason".into(), Value::String("stop".into()));
            }
        }
    }

    fn record(&self, session: &StreamSession, termination: Termination) {
        let summary = session.summary(termination, &self.deps.config.config_hash);
        self.deps.sink.record_turn(&summary);
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        // A streaming body may legitimately run for minutes; only the wait
        // for headers is bounded there. The idle timeout covers the rest.
        let timeout = request.timeout_ms.map(Duration::from_millis);
        let resp = match timeout {
            Some(limit) if request.stream => tokio::time::timeout(limit, req.send())
                .await
                .map_err(|_| HttpError::Timeout(format!("no response headers after {limit:?}")))?
                .map_err(transport_error)?,
            Some(limit) => {
                req = req.timeout(limit);
                req.send().await.map_err(transport_error)?
            }
            None => req.send().await.map_err(transport_error)?,
        };

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp.bytes_stream().map_err(transport_error);
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp.bytes().await.map_err(transport_error)?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public factory for default engine client
// ---------------------------------------------------------------------------

pub fn build_engine_client(config: Arc<Config>) -> EngineUpstreamClient {
    let deps = EngineDeps {
        config,
        http: Arc::new(ReqwestHttpSender::new(reqwest::Client::new())),
        sink: Arc::new(TracingSink),
    };

    EngineUpstreamClient::new_with(deps)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in &DROPPED_REQUEST_HEADERS {
        headers.remove(name);
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Remove framing headers that no longer describe the body we send back.
fn strip_hop_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
}

fn content_encoding_is(headers: &HeaderMap, encoding: &str) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(encoding))
        .unwrap_or(false)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    content_encoding_is(headers, "gzip")
}

fn is_deflate(headers: &HeaderMap) -> bool {
    content_encoding_is(headers, "deflate")
}

fn decompress(mut reader: impl std::io::Read, what: &str) -> Result<Bytes, ProxyError> {
    let mut decompressed = Vec::new();
    reader
        .read_to_end(&mut decompressed)
        .map_err(|e| ProxyError::UpstreamFailure(format!("{what} decompression failed: {e}")))?;
    Ok(Bytes::from(decompressed))
}

/// Decompress body if Content-Encoding is set. Strips Content-Encoding and
/// Content-Length from headers (body size changed after decompression).
fn maybe_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, ProxyError> {
    let result = if is_gzip(headers) {
        decompress(GzDecoder::new(&body[..]), "gzip")?
    } else if is_deflate(headers) {
        decompress(DeflateDecoder::new(&body[..]), "deflate")?
    } else {
        return Ok(body);
    };
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    Ok(result)
}

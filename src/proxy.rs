// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// HTTP front
//
// Responsibilities:
// - Route POST /v1/chat/completions and /chat/completions
// - Read the request body (10 MiB cap)
// - Hand the request to the injected UpstreamClient
// - 404 for everything else

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;

use crate::message::RequestError;

/// Largest inbound body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 10000;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Inbound request data forwarded to the upstream client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response handed back to the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Body::from(body.into()),
        }
    }
}

/// Errors surfaced to the client before a response stream exists.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::BodyRead(_) => "invalid_request_error",
            ProxyError::UpstreamFailure(_) | ProxyError::UpstreamTimeout(_) => "upstream_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        // Transport details stay in the logs.
        let message = match &self {
            ProxyError::UpstreamFailure(_) => "upstream request failed".to_string(),
            ProxyError::UpstreamTimeout(_) => "upstream request timed out".to_string(),
            ProxyError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = json!({"error": {"message": message, "type": self.kind()}});
        (self.status(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Handles one chat-completions request end to end.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    request: Request<Body>,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return ProxyError::BodyRead(e.to_string()).into_response(),
    };

    let proxy_req = ProxyRequest {
        method,
        uri,
        headers,
        body,
    };

    match state.upstream.forward(proxy_req).await {
        Ok(resp) => {
            let mut response = Response::new(resp.body);
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "request failed");
            e.into_response()
        }
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"message": "unknown path", "type": "not_found"}})),
    )
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the router. The upstream client is injected.
pub fn build_router(upstream: Arc<dyn UpstreamClient>) -> Router {
    let state = AppState { upstream };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .fallback(not_found)
        .with_state(state)
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Integration tests
//
// End-to-end through the router, the engine and the real reqwest sender:
// request → rewrite → upstream (wiremock) → translation → response
//
// Uses wiremock as the inference server and tower::ServiceExt::oneshot for
// in-process HTTP.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use harmony_shim::config::{self, StringSource};
use harmony_shim::engine;
use harmony_shim::proxy;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

fn app_for(base_url: &str, extra_yaml: &str) -> axum::Router {
    let yaml = format!("shim: v1\nupstream:\n  base_url: {base_url}\n  idle_timeout_ms: 5000\n{extra_yaml}");
    let config = Arc::new(config::load_config(&StringSource::new(yaml)).expect("test config should parse"));
    let upstream: Arc<dyn proxy::UpstreamClient> = Arc::new(engine::build_engine_client(config));
    proxy::build_router(upstream)
}

fn json_request(path_str: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path_str)
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-local")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap()
}

fn sse_body(frames: &[Value]) -> String {
    let mut out: String = frames.iter().map(|f| format!("data: {f}\n\n")).collect();
    out.push_str("data: [DONE]\n\n");
    out
}

fn tool_delta(index: usize, name: Option<&str>, args: &str) -> Value {
    let mut function = json!({"arguments": args});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": index, "function": function}]}}]})
}

fn content_delta(text: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}}]})
}

fn reasoning_delta(text: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {"reasoning_content": text}}]})
}

fn finish(reason: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
}

/// Parsed `data:` payloads, with the sentinel as `None`.
fn frames(text: &str) -> Vec<Option<Value>> {
    text.split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| {
            let data = f.strip_prefix("data: ").expect("every frame is a data line");
            if data == "[DONE]" {
                None
            } else {
                Some(serde_json::from_str(data).unwrap())
            }
        })
        .collect()
}

fn streamed_content(frames: &[Option<Value>]) -> String {
    frames
        .iter()
        .flatten()
        .filter_map(|f| f["choices"][0]["delta"]["content"].as_str().map(str::to_string))
        .collect()
}

fn assert_sentinel_last(frames: &[Option<Value>]) {
    assert!(frames.last().is_some_and(Option::is_none), "sentinel must be last");
    assert_eq!(frames.iter().filter(|f| f.is_none()).count(), 1);
}

async fn mount_sse(server: &MockServer, frames: &[Value]) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(frames), "text/event-stream"))
        .mount(server)
        .await;
}

fn streaming_chat(user: &str) -> Value {
    json!({
        "model": "gpt-oss-20b",
        "stream": true,
        "temperature": 0.9,
        "messages": [
            {"role": "system", "content": "You are a coding agent."},
            {"role": "user", "content": user}
        ],
        "tools": [{"type": "function", "function": {"name": "read_file"}}]
    })
}

async fn upstream_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    serde_json::from_slice(&requests[0].body).unwrap()
}

// ---------------------------------------------------------------------------
// Streaming translation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fragmented_tool_call_streams_as_one_xml_block() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        &[
            reasoning_delta("Need to look at the file."),
            tool_delta(0, Some("read_"), ""),
            tool_delta(0, Some("file"), "{\"pa"),
            tool_delta(0, None, "th\":\"src/ma"),
            tool_delta(0, None, "in.rs\"}"),
            finish("tool_calls"),
        ],
    )
    .await;
    let app = app_for(&server.uri(), "");

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("open main"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");

    let text = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    let frames = frames(&text);
    assert_eq!(
        frames[0].as_ref().unwrap()["choices"][0]["delta"],
        json!({"role": "assistant"})
    );
    assert_eq!(streamed_content(&frames), "<read_file><path>src/main.rs</path></read_file>");
    assert!(!text.contains("reasoning"), "reasoning is never forwarded as content");
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn alias_synonym_and_unknown_tools_in_one_turn() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        &[
            content_delta("Running two things.\n"),
            tool_delta(0, Some("bash"), "{\"cmd\":\"ls\",\"requires_approval\":false}"),
            tool_delta(1, Some("weather_lookup"), "{\"city\":\"Oslo\"}"),
            finish("tool_calls"),
        ],
    )
    .await;
    let app = app_for(&server.uri(), "");

    let resp = app.oneshot(json_request("/chat/completions", &streaming_chat("go"))).await.unwrap();
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    assert_eq!(
        streamed_content(&frames),
        "Running two things.\n\
         <execute_command><command>ls</command><requires_approval>false</requires_approval></execute_command>\
         <use_mcp_tool><server_name>unknown</server_name><tool_name>weather_lookup</tool_name>\
         <arguments>{\"city\":\"Oslo\"}</arguments></use_mcp_tool>"
    );
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn strict_mode_rejects_unknown_tool_visibly() {
    let server = MockServer::start().await;
    mount_sse(&server, &[tool_delta(0, Some("weather_lookup"), "{}"), finish("tool_calls")]).await;
    let app = app_for(&server.uri(), "conversion:\n  strict_xml: true\n");

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("go"))).await.unwrap();
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    let content = streamed_content(&frames);
    assert!(content.contains("weather_lookup"));
    assert!(!content.contains("<use_mcp_tool>"));
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn empty_turn_promotes_reasoning() {
    let server = MockServer::start().await;
    mount_sse(
        &server,
        &[reasoning_delta("The answer "), reasoning_delta("is 42."), finish("stop")],
    )
    .await;
    let app = app_for(&server.uri(), "fallback:\n  promote_reasoning: true\n");

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("?"))).await.unwrap();
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    assert_eq!(streamed_content(&frames), "The answer is 42.");
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn empty_turn_with_fallbacks_off_sends_only_the_sentinel() {
    let server = MockServer::start().await;
    mount_sse(&server, &[reasoning_delta("hmm"), finish("stop")]).await;
    let app = app_for(&server.uri(), "");

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("?"))).await.unwrap();
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    assert_eq!(streamed_content(&frames), "");
    assert_eq!(frames.len(), 2);
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn upstream_error_status_becomes_clarification_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let app = app_for(
        &server.uri(),
        "fallback:\n  synthesize_empty_xml: true\n  clarification_question: Try again?\n",
    );

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("?"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    assert_eq!(
        streamed_content(&frames),
        "<ask_followup_question><question>Try again?</question></ask_followup_question>"
    );
    assert_sentinel_last(&frames);
}

#[tokio::test]
async fn unreachable_upstream_still_closes_the_stream() {
    // Bind and release a port so nothing is listening on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let app = app_for(&format!("http://127.0.0.1:{port}"), "");

    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat("?"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let frames = frames(&String::from_utf8(body_bytes(resp).await.to_vec()).unwrap());
    assert_eq!(frames.len(), 2);
    assert_sentinel_last(&frames);
}

// ---------------------------------------------------------------------------
// Request rewriting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upstream_receives_rewritten_request_and_client_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&[finish("stop")]), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;
    let yaml = "request:\n  sampling:\n    temperature: 0.6\n    top_p: null\n  modes:\n    plan:\n      sampling:\n        temperature: 0.2\n      reasoning_effort: high\n";
    let app = app_for(&server.uri(), yaml);

    let resp = app
        .oneshot(json_request("/v1/chat/completions", &streaming_chat("<environment_details>\nPLAN MODE\n</environment_details>")))
        .await
        .unwrap();
    body_bytes(resp).await;

    let sent = upstream_body(&server).await;
    assert_eq!(sent["temperature"], json!(0.2));
    assert!(sent.get("top_p").is_none());
    assert_eq!(sent["cache_prompt"], json!(true));
    assert_eq!(sent["reasoning_format"], json!("deepseek"));
    assert_eq!(sent["reasoning_effort"], json!("high"));
    assert_eq!(sent["chat_template_kwargs"]["reasoning_effort"], json!("high"));
    assert_eq!(sent["parallel_tool_calls"], json!(false));
    assert_eq!(sent["parse_tool_calls"], json!(true));
    assert_eq!(sent["messages"][1]["content"], json!("<environment_details>\nPLAN MODE\n</environment_details>"));
}

#[tokio::test]
async fn condense_trigger_forces_condense_tool_choice() {
    let server = MockServer::start().await;
    mount_sse(&server, &[finish("stop")]).await;
    let app = app_for(&server.uri(), "request:\n  force_tool_calls: true\n");

    let user = "<explicit_instructions type=\"condense\">summarize</explicit_instructions>";
    let resp = app.oneshot(json_request("/v1/chat/completions", &streaming_chat(user))).await.unwrap();
    body_bytes(resp).await;

    let sent = upstream_body(&server).await;
    assert_eq!(
        sent["tool_choice"],
        json!({"type": "function", "function": {"name": "condense"}})
    );
}

// ---------------------------------------------------------------------------
// Non-streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_streaming_tool_calls_are_rewritten_to_xml() {
    let server = MockServer::start().await;
    let upstream_response = json!({
        "id": "cmpl-9",
        "object": "chat.completion",
        "model": "gpt-oss-20b",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "write", "arguments": "{\"file\":\"a.txt\",\"text\":\"x < y\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_response))
        .mount(&server)
        .await;
    let app = app_for(&server.uri(), "");

    let mut body = streaming_chat("write it");
    body["stream"] = json!(false);
    let resp = app.oneshot(json_request("/v1/chat/completions", &body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    let message = &json["choices"][0]["message"];
    assert_eq!(
        message["content"],
        json!("<write_to_file><path>a.txt</path><content>x &lt; y</content></write_to_file>")
    );
    assert!(message.get("tool_calls").is_none());
    assert_eq!(json["choices"][0]["finish_reason"], json!("stop"));
}

#[tokio::test]
async fn non_streaming_bad_upstream_json_is_502() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    let app = app_for(&server.uri(), "");

    let mut body = streaming_chat("x");
    body["stream"] = json!(false);
    let resp = app.oneshot(json_request("/v1/chat/completions", &body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let json: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(json, json!({"error": "bad_upstream_json"}));
}

// ---------------------------------------------------------------------------
// Request validation and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_requests_are_400_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    for raw in ["", "{not json", "[1,2]", r#"{"messages":"hi"}"#] {
        let app = app_for(&server.uri(), "");
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {raw:?}");
        let json: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(json["error"]["type"], json!("invalid_request_error"));
    }
}

#[tokio::test]
async fn unknown_path_is_404() {
    let server = MockServer::start().await;
    let app = app_for(&server.uri(), "");
    let resp = app
        .oneshot(json_request("/v1/completions", &json!({"prompt": "x"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

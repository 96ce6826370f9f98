// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Request policy engine
//
// Rewrites the inbound chat request before it is forwarded:
// 1. Detect the agent mode from the latest user/system message
// 2. Strip client sampling keys and apply the resolved SamplingPolicy
// 3. Inject cache_prompt, reasoning_format and tool-calling flags
// 4. Apply reasoning effort (mode value over global value)
// 5. Decide tool_choice: condense trigger > force_tool_calls > force none

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::{Config, ModeDetection, OverrideAction, RequestPolicyConfig};
use crate::message::{InboundRequest, Message, Mode, Role};

// ---------------------------------------------------------------------------
// Mode detection
// ---------------------------------------------------------------------------

fn mode_in(message: &Message, detection: &ModeDetection) -> Option<Mode> {
    if detection.plan_marker.is_match(&message.content) {
        Some(Mode::Plan)
    } else if detection.act_marker.is_match(&message.content) {
        Some(Mode::Act)
    } else {
        None
    }
}

/// Latest user message first, then latest system message, default ACT.
pub fn detect_mode(request: &InboundRequest, detection: &ModeDetection) -> Mode {
    [Role::User, Role::System]
        .iter()
        .filter_map(|role| request.latest(role))
        .find_map(|message| mode_in(message, detection))
        .unwrap_or(Mode::Act)
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Ordered sampling entries for one session: the base set with the mode's
/// override set layered on top.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingPolicy {
    entries: Vec<(String, OverrideAction)>,
}

impl SamplingPolicy {
    pub fn resolve(policy: &RequestPolicyConfig, mode: Mode) -> Self {
        let mut entries = policy.sampling.clone();
        for (key, action) in &policy.modes.get(mode).sampling {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = action.clone(),
                None => entries.push((key.clone(), action.clone())),
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, OverrideAction)] {
        &self.entries
    }

    pub fn apply(&self, body: &mut Map<String, Value>) {
        for (key, action) in &self.entries {
            match action {
                OverrideAction::Set(value) => {
                    body.insert(key.clone(), value.clone());
                }
                OverrideAction::Drop => {
                    body.shift_remove(key);
                }
            }
        }
    }

    /// JSON view for the turn summary; dropped keys show as null.
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(key, action)| {
                let value = match action {
                    OverrideAction::Set(v) => v.clone(),
                    OverrideAction::Drop => Value::Null,
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

/// Which `tool_choice` the policy forced, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedToolChoice {
    Condense,
    Required,
    None,
}

/// The rewritten upstream request plus the facts the turn summary reports.
#[derive(Debug, Clone)]
pub struct RewrittenRequest {
    pub body: Map<String, Value>,
    pub mode: Mode,
    pub sampling: SamplingPolicy,
    pub stream: bool,
    /// Model named by the client, else the configured default.
    pub model: String,
    pub tools_injected: bool,
    pub cache_prompt: bool,
    pub reasoning_effort: Option<String>,
    pub forced_tool_choice: Option<ForcedToolChoice>,
}

impl RewrittenRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body)
    }
}

pub fn rewrite_request(request: InboundRequest, config: &Config) -> RewrittenRequest {
    let policy = &config.request;
    let mode = detect_mode(&request, &config.mode_detection);
    let mode_policy = policy.modes.get(mode);
    let sampling = SamplingPolicy::resolve(policy, mode);

    let stream = request.is_stream();
    let tools_injected = request.has_tools();
    let model = request
        .model()
        .map(str::to_string)
        .unwrap_or_else(|| config.upstream.model.clone());
    let condense = policy
        .condense_trigger
        .as_deref()
        .zip(request.latest(&Role::User))
        .is_some_and(|(trigger, msg)| msg.content.contains(trigger));

    let mut body = request.body;

    if policy.strip_client_sampling {
        for key in &policy.client_sampling_keys {
            body.shift_remove(key);
        }
    }
    sampling.apply(&mut body);

    if policy.cache_prompt {
        body.insert("cache_prompt".into(), Value::Bool(true));
    }
    if let Some(format) = &policy.reasoning_format {
        body.insert("reasoning_format".into(), Value::String(format.clone()));
    }
    if tools_injected {
        body.insert("parallel_tool_calls".into(), Value::Bool(false));
        body.insert("parse_tool_calls".into(), Value::Bool(true));
    }

    let reasoning_effort = mode_policy
        .reasoning_effort
        .clone()
        .or_else(|| policy.reasoning_effort.clone());
    if let Some(effort) = &reasoning_effort {
        body.insert("reasoning_effort".into(), Value::String(effort.clone()));
        let kwargs = body
            .entry("chat_template_kwargs")
            .or_insert_with(|| Value::Object(Map::new()));
        if !kwargs.is_object() {
            *kwargs = Value::Object(Map::new());
        }
        if let Value::Object(kwargs) = kwargs {
            kwargs.insert("reasoning_effort".into(), Value::String(effort.clone()));
        }
    }

    let force_required = mode_policy.force_tool_calls.unwrap_or(policy.force_tool_calls);
    let forced_tool_choice = if condense {
        body.insert(
            "tool_choice".into(),
            json!({"type": "function", "function": {"name": policy.condense_tool}}),
        );
        Some(ForcedToolChoice::Condense)
    } else if force_required {
        body.insert("tool_choice".into(), json!("required"));
        Some(ForcedToolChoice::Required)
    } else if policy.force_tool_choice_none {
        body.insert("tool_choice".into(), json!("none"));
        Some(ForcedToolChoice::None)
    } else {
        None
    };

    RewrittenRequest {
        body,
        mode,
        sampling,
        stream,
        model,
        tools_injected,
        cache_prompt: policy.cache_prompt,
        reasoning_effort,
        forced_tool_choice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, StringSource};

    fn config(yaml: &str) -> Config {
        load_config(&StringSource::new(yaml)).unwrap()
    }

    fn request(v: Value) -> InboundRequest {
        InboundRequest::parse(v.to_string().as_bytes()).unwrap()
    }

    fn user(text: &str) -> Value {
        json!({"messages": [{"role": "user", "content": text}]})
    }

    const MODES: &str = r#"
shim: v1
request:
  sampling:
    temperature: 1.0
    top_p: 1.0
  modes:
    plan:
      sampling:
        temperature: 0.2
        top_p: ~
      reasoning_effort: high
    act:
      reasoning_effort: low
"#;

    // ---------------------------------------------------------------
    // Mode detection
    // ---------------------------------------------------------------

    #[test]
    fn plan_marker_in_latest_user_message() {
        let c = config("shim: v1\n");
        let req = request(user("<environment_details>\nPLAN MODE\n</environment_details>"));
        assert_eq!(detect_mode(&req, &c.mode_detection), Mode::Plan);
    }

    #[test]
    fn older_user_messages_do_not_count() {
        let c = config("shim: v1\n");
        let req = request(json!({"messages": [
            {"role": "user", "content": "PLAN MODE"},
            {"role": "user", "content": "hi"}
        ]}));
        assert_eq!(detect_mode(&req, &c.mode_detection), Mode::Act);
    }

    #[test]
    fn system_message_is_consulted_when_user_has_no_marker() {
        let c = config("shim: v1\n");
        let req = request(json!({"messages": [
            {"role": "system", "content": "You are in\n  PLAN MODE  \nnow"},
            {"role": "user", "content": "hi"}
        ]}));
        assert_eq!(detect_mode(&req, &c.mode_detection), Mode::Plan);
    }

    #[test]
    fn marker_must_be_on_its_own_line() {
        let c = config("shim: v1\n");
        let req = request(user("switch to PLAN MODE please"));
        assert_eq!(detect_mode(&req, &c.mode_detection), Mode::Act);
    }

    #[test]
    fn default_mode_is_act() {
        let c = config("shim: v1\n");
        assert_eq!(detect_mode(&request(json!({"messages": []})), &c.mode_detection), Mode::Act);
    }

    // ---------------------------------------------------------------
    // Sampling
    // ---------------------------------------------------------------

    #[test]
    fn mode_overrides_layer_over_base_in_place() {
        let c = config(MODES);
        let plan = SamplingPolicy::resolve(&c.request, Mode::Plan);
        assert_eq!(
            plan.entries(),
            &[
                ("temperature".to_string(), OverrideAction::Set(json!(0.2))),
                ("top_p".to_string(), OverrideAction::Drop),
            ]
        );
        assert_eq!(plan.snapshot(), json!({"temperature": 0.2, "top_p": null}));

        let act = SamplingPolicy::resolve(&c.request, Mode::Act);
        assert_eq!(act.snapshot(), json!({"temperature": 1.0, "top_p": 1.0}));
    }

    #[test]
    fn client_sampling_is_stripped_then_policy_applied() {
        let c = config(MODES);
        let mut body = user("PLAN MODE");
        body["temperature"] = json!(0.9);
        body["top_k"] = json!(40);
        body["seed"] = json!(7);
        let out = rewrite_request(request(body), &c);
        assert_eq!(out.mode, Mode::Plan);
        assert_eq!(out.body["temperature"], json!(0.2));
        assert!(!out.body.contains_key("top_k"));
        assert!(!out.body.contains_key("seed"));
        assert!(!out.body.contains_key("top_p"));
    }

    #[test]
    fn client_sampling_survives_when_stripping_disabled() {
        let c = config(
            "shim: v1\nrequest:\n  strip_client_sampling: false\n  sampling:\n    top_p: ~\n",
        );
        let mut body = user("hi");
        body["temperature"] = json!(0.9);
        body["top_p"] = json!(0.5);
        let out = rewrite_request(request(body), &c);
        assert_eq!(out.body["temperature"], json!(0.9));
        assert!(!out.body.contains_key("top_p"));
    }

    // ---------------------------------------------------------------
    // Injected fields
    // ---------------------------------------------------------------

    #[test]
    fn default_injections() {
        let c = config("shim: v1\n");
        let out = rewrite_request(request(user("hi")), &c);
        assert_eq!(out.body["cache_prompt"], json!(true));
        assert_eq!(out.body["reasoning_format"], json!("deepseek"));
        assert!(!out.body.contains_key("parallel_tool_calls"));
        assert!(!out.body.contains_key("tool_choice"));
        assert!(!out.tools_injected);
        assert_eq!(out.forced_tool_choice, None);
        assert_eq!(out.model, crate::config::DEFAULT_MODEL);
    }

    #[test]
    fn cache_prompt_can_be_disabled() {
        let c = config("shim: v1\nrequest:\n  cache_prompt: false\n");
        let out = rewrite_request(request(user("hi")), &c);
        assert!(!out.body.contains_key("cache_prompt"));
        assert!(!out.cache_prompt);
    }

    #[test]
    fn tools_turn_on_tool_call_flags() {
        let c = config("shim: v1\n");
        let mut body = user("hi");
        body["tools"] = json!([{"type": "function", "function": {"name": "read_file"}}]);
        body["parallel_tool_calls"] = json!(true);
        let out = rewrite_request(request(body), &c);
        assert!(out.tools_injected);
        assert_eq!(out.body["parallel_tool_calls"], json!(false));
        assert_eq!(out.body["parse_tool_calls"], json!(true));
    }

    #[test]
    fn reasoning_effort_prefers_mode_value_and_merges_kwargs() {
        let c = config(MODES);
        let mut body = user("hi");
        body["chat_template_kwargs"] = json!({"enable_thinking": true});
        let out = rewrite_request(request(body), &c);
        assert_eq!(out.reasoning_effort.as_deref(), Some("low"));
        assert_eq!(out.body["reasoning_effort"], json!("low"));
        assert_eq!(
            out.body["chat_template_kwargs"],
            json!({"enable_thinking": true, "reasoning_effort": "low"})
        );
    }

    #[test]
    fn global_reasoning_effort_is_the_fallback() {
        let c = config("shim: v1\nrequest:\n  reasoning_effort: medium\n");
        let out = rewrite_request(request(user("hi")), &c);
        assert_eq!(out.body["chat_template_kwargs"], json!({"reasoning_effort": "medium"}));
    }

    // ---------------------------------------------------------------
    // tool_choice
    // ---------------------------------------------------------------

    #[test]
    fn condense_trigger_wins_over_force_flags() {
        let c = config("shim: v1\nrequest:\n  force_tool_calls: true\n");
        let out = rewrite_request(
            request(user("<explicit_instructions type=\"condense\">\nsummarize")),
            &c,
        );
        assert_eq!(out.forced_tool_choice, Some(ForcedToolChoice::Condense));
        assert_eq!(
            out.body["tool_choice"],
            json!({"type": "function", "function": {"name": "condense"}})
        );
    }

    #[test]
    fn force_tool_calls_sets_required() {
        let c = config("shim: v1\nrequest:\n  modes:\n    act:\n      force_tool_calls: true\n");
        let out = rewrite_request(request(user("hi")), &c);
        assert_eq!(out.body["tool_choice"], json!("required"));

        let plan = rewrite_request(request(user("PLAN MODE")), &c);
        assert!(!plan.body.contains_key("tool_choice"));
    }

    #[test]
    fn force_tool_choice_none() {
        let c = config("shim: v1\nrequest:\n  force_tool_choice_none: true\n");
        let mut body = user("hi");
        body["tool_choice"] = json!("auto");
        let out = rewrite_request(request(body), &c);
        assert_eq!(out.body["tool_choice"], json!("none"));
        assert_eq!(out.forced_tool_choice, Some(ForcedToolChoice::None));
    }

    #[test]
    fn unrelated_fields_keep_their_order() {
        let c = config("shim: v1\n");
        let body = json!({"model": "m", "messages": [], "stream": true, "user": "u"});
        let out = rewrite_request(request(body), &c);
        let keys: Vec<&str> = out.body.keys().take(4).map(String::as_str).collect();
        assert_eq!(keys, vec!["model", "messages", "stream", "user"]);
        assert!(out.stream);
        assert_eq!(out.model, "m");
    }
}

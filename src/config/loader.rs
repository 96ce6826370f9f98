// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::tables::{AliasTable, ArgumentSynonymTable, ToolTables};

use super::defaults::{builtin_defaults, empty_tables};
use super::error::ConfigError;
use super::pattern::{CompiledPattern, PatternSet};
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a shim config from the given source.
///
/// Steps:
/// 1. Read raw YAML text and hash it
/// 2. Parse into raw deserialization types
/// 3. Merge the embedded tool tables with user entries
/// 4. Expand `${VAR}` in the upstream URL
/// 5. Compile regexes and validate cross-field rules
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.shim != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.shim
        )));
    }

    let defaults = if raw.use_default_tables != Some(false) {
        builtin_defaults()
    } else {
        empty_tables()
    };

    let upstream = build_upstream(raw.upstream)?;
    let request = build_request_policy(raw.request, &defaults.client_sampling_keys)?;
    let mode_detection = build_mode_detection(raw.mode_detection, &defaults.mode_detection)?;
    let (conversion, tables) = build_conversion(raw.conversion, defaults)?;
    let fallback = build_fallback(raw.fallback);
    let emitter = build_emitter(raw.emitter)?;
    let observability = build_observability(raw.observability);

    Ok(Config {
        version: raw.shim,
        upstream,
        request,
        mode_detection,
        conversion,
        tables: Arc::new(tables),
        fallback,
        emitter,
        observability,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Expand `${VAR}` references from the environment. Unterminated or empty
/// references are left as written.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
        ConfigError::InvalidRegex {
            pattern: "env reference".into(),
            source: e,
        }
    })?;

    let mut missing = None;
    let expanded = re.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::UndefinedVariable { name }),
        None => Ok(expanded.into_owned()),
    }
}

fn build_upstream(raw: Option<raw::RawUpstream>) -> Result<UpstreamConfig, ConfigError> {
    let mut upstream = UpstreamConfig::default();
    let Some(raw) = raw else {
        return Ok(upstream);
    };

    if let Some(url) = raw.base_url {
        upstream.base_url = normalize_base_url(&resolve_variables(&url)?)?;
    }
    upstream.timeout_ms = raw.timeout_ms;
    if let Some(idle) = raw.idle_timeout_ms {
        if idle == 0 {
            return Err(ConfigError::Validation(
                "upstream.idle_timeout_ms must be > 0".into(),
            ));
        }
        upstream.idle_timeout_ms = idle;
    }
    if let Some(model) = raw.model {
        upstream.model = model;
    }
    Ok(upstream)
}

/// Trim a trailing slash and require an http(s) scheme.
pub fn normalize_base_url(url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "upstream base_url \"{url}\" must start with http:// or https://"
        )));
    }
    Ok(trimmed.to_string())
}

fn build_sampling(raw: raw::RawSampling, scope: &str) -> Result<SamplingOverrides, ConfigError> {
    raw.into_iter()
        .map(|(key, value)| {
            let key = match key {
                serde_yaml::Value::String(key) => key,
                other => {
                    return Err(ConfigError::Validation(format!(
                        "{scope}.sampling: key {other:?} is not a string"
                    )))
                }
            };
            if value.is_null() {
                return Ok((key, OverrideAction::Drop));
            }
            let json = serde_json::to_value(&value).map_err(|e| {
                ConfigError::Validation(format!("{scope}.sampling.{key}: {e}"))
            })?;
            Ok((key, OverrideAction::Set(json)))
        })
        .collect()
}

fn build_mode_policy(
    raw: Option<raw::RawModePolicy>,
    scope: &str,
) -> Result<ModePolicy, ConfigError> {
    let raw = raw.unwrap_or_default();
    Ok(ModePolicy {
        sampling: build_sampling(raw.sampling, scope)?,
        reasoning_effort: raw.reasoning_effort,
        force_tool_calls: raw.force_tool_calls,
    })
}

fn build_request_policy(
    raw: Option<raw::RawRequest>,
    default_keys: &[String],
) -> Result<RequestPolicyConfig, ConfigError> {
    let mut policy = RequestPolicyConfig {
        strip_client_sampling: true,
        client_sampling_keys: default_keys.to_vec(),
        cache_prompt: true,
        reasoning_format: Some(DEFAULT_REASONING_FORMAT.to_string()),
        reasoning_effort: None,
        force_tool_calls: false,
        force_tool_choice_none: false,
        condense_trigger: Some(DEFAULT_CONDENSE_TRIGGER.to_string()),
        condense_tool: DEFAULT_CONDENSE_TOOL.to_string(),
        sampling: Vec::new(),
        modes: ModeTable::default(),
    };
    let Some(raw) = raw else {
        return Ok(policy);
    };

    if let Some(v) = raw.strip_client_sampling {
        policy.strip_client_sampling = v;
    }
    if let Some(keys) = raw.client_sampling_keys {
        policy.client_sampling_keys = keys;
    }
    if let Some(v) = raw.cache_prompt {
        policy.cache_prompt = v;
    }
    if let Some(format) = raw.reasoning_format {
        // An empty string turns the directive off.
        policy.reasoning_format = (!format.is_empty()).then_some(format);
    }
    policy.reasoning_effort = raw.reasoning_effort;
    policy.force_tool_calls = raw.force_tool_calls.unwrap_or(false);
    policy.force_tool_choice_none = raw.force_tool_choice_none.unwrap_or(false);
    if let Some(trigger) = raw.condense_trigger {
        policy.condense_trigger = (!trigger.is_empty()).then_some(trigger);
    }
    if let Some(tool) = raw.condense_tool {
        policy.condense_tool = tool;
    }
    policy.sampling = build_sampling(raw.sampling, "request")?;

    if let Some(modes) = raw.modes {
        policy.modes = ModeTable {
            plan: build_mode_policy(modes.plan, "request.modes.plan")?,
            act: build_mode_policy(modes.act, "request.modes.act")?,
        };
    }

    let any_forced = policy.force_tool_calls
        || policy.modes.plan.force_tool_calls == Some(true)
        || policy.modes.act.force_tool_calls == Some(true);
    if any_forced && policy.force_tool_choice_none {
        return Err(ConfigError::Validation(
            "force_tool_calls and force_tool_choice_none cannot both be enabled".into(),
        ));
    }

    Ok(policy)
}

fn build_mode_detection(
    raw: Option<raw::RawModeDetection>,
    defaults: &raw::RawDefaultModeDetection,
) -> Result<ModeDetection, ConfigError> {
    let (plan, act) = match raw {
        Some(r) => (
            r.plan_marker.unwrap_or_else(|| defaults.plan_marker.clone()),
            r.act_marker.unwrap_or_else(|| defaults.act_marker.clone()),
        ),
        None => (defaults.plan_marker.clone(), defaults.act_marker.clone()),
    };
    Ok(ModeDetection {
        plan_marker: CompiledPattern::compile(&plan)?,
        act_marker: CompiledPattern::compile(&act)?,
    })
}

fn build_conversion(
    raw: Option<raw::RawConversion>,
    defaults: raw::RawDefaults,
) -> Result<(ConversionConfig, ToolTables), ConfigError> {
    let mut known: BTreeSet<String> = defaults.known_tools.into_iter().collect();
    let mut aliases = defaults.aliases;
    let mut synonyms = defaults.argument_synonyms;
    let mut browser_patterns = PatternSet::compile_all(&defaults.browser_patterns)?;

    let mut conversion = ConversionConfig {
        strict_xml: false,
        allow_unknown_as_mcp: true,
        browser_server_name: DEFAULT_BROWSER_SERVER.to_string(),
    };

    if let Some(raw) = raw {
        conversion.strict_xml = raw.strict_xml.unwrap_or(false);
        conversion.allow_unknown_as_mcp = raw.allow_unknown_as_mcp.unwrap_or(true);
        if let Some(name) = raw.browser_server_name {
            conversion.browser_server_name = name;
        }
        known.extend(raw.known_tools);
        aliases.extend(raw.aliases);
        for (tool, entries) in raw.argument_synonyms {
            synonyms.entry(tool).or_default().extend(entries);
        }
        browser_patterns.extend(PatternSet::compile_all(&raw.browser_patterns)?);
    }

    let tables = ToolTables {
        aliases: AliasTable::new(known, aliases, browser_patterns)?,
        synonyms: ArgumentSynonymTable::new(synonyms)?,
    };
    Ok((conversion, tables))
}

fn build_fallback(raw: Option<raw::RawFallback>) -> FallbackConfig {
    let mut fallback = FallbackConfig::default();
    if let Some(raw) = raw {
        fallback.promote_reasoning = raw.promote_reasoning.unwrap_or(false);
        fallback.synthesize_empty_xml = raw.synthesize_empty_xml.unwrap_or(false);
        if let Some(q) = raw.clarification_question {
            fallback.clarification_question = q;
        }
    }
    fallback
}

fn build_emitter(raw: Option<raw::RawEmitter>) -> Result<EmitterConfig, ConfigError> {
    let mut emitter = EmitterConfig::default();
    if let Some(bytes) = raw.and_then(|r| r.flush_bytes) {
        if bytes == 0 {
            return Err(ConfigError::Validation(
                "emitter.flush_bytes must be >= 1".into(),
            ));
        }
        emitter.flush_bytes = bytes;
    }
    Ok(emitter)
}

fn build_observability(raw: Option<raw::RawObservability>) -> ObservabilityConfig {
    let Some(raw) = raw else {
        return ObservabilityConfig::default();
    };
    let path = |p: Option<String>| p.filter(|s| !s.is_empty()).map(PathBuf::from);
    ObservabilityConfig {
        log_body: raw.log_body.unwrap_or(false),
        trace_stream: raw.trace_stream.unwrap_or(false),
        log_reasoning: raw.log_reasoning.unwrap_or(false),
        dump_upstream: path(raw.dump_upstream),
        dump_downstream: path(raw.dump_downstream),
    }
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

use super::raw::RawDefaults;

/// Built-in tool tables, embedded at compile time.
const DEFAULTS_YAML: &str = include_str!("../../schema/defaults.yaml");

/// Parse the embedded defaults.
/// Panics on invalid YAML (this file ships with the binary).
pub fn builtin_defaults() -> RawDefaults {
    serde_yaml::from_str(DEFAULTS_YAML).expect("embedded defaults.yaml is invalid")
}

/// Empty tables, used when `use_default_tables: false`. Sampling keys and
/// mode markers still come from the embedded file since the request policy
/// cannot work without them.
pub fn empty_tables() -> RawDefaults {
    let builtin = builtin_defaults();
    RawDefaults {
        known_tools: Vec::new(),
        aliases: Default::default(),
        argument_synonyms: Default::default(),
        browser_patterns: Vec::new(),
        client_sampling_keys: builtin.client_sampling_keys,
        mode_detection: builtin.mode_detection,
    }
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

/// Everything that can go wrong while turning `shim.yaml` into a `Config`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config source: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid regex pattern \"{pattern}\": {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("undefined variable ${{{name}}} in config (not set in environment)")]
    UndefinedVariable { name: String },

    #[error("argument synonym for tool \"{tool}\" is not idempotent: \"{key}\" is both a synonym and a canonical key")]
    CyclicSynonym { tool: String, key: String },
}

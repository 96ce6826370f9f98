// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Shim configuration: YAML schema, embedded tool tables, validation.

mod defaults;
mod error;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use loader::{compute_hash, load_config, normalize_base_url, resolve_variables};
pub use pattern::{CompiledPattern, PatternSet};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

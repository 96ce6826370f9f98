// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Where the YAML text of a shim config comes from.
///
/// The loader only ever sees a string, so tests can hand it YAML directly
/// through `StringSource` and the binary reads `shim.yaml` through
/// `FileSource`.
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;

    /// Short human-readable origin, used in startup logs.
    fn describe(&self) -> String;
}

/// Reads the config from a file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// In-memory YAML.
pub struct StringSource {
    pub content: String,
}

impl StringSource {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }

    fn describe(&self) -> String {
        "inline".to_string()
    }
}

// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Tool name and argument tables
//
// Built once by the config loader and shared read-only by every session:
// - AliasTable: alias -> canonical tool, known tool set, browser catch-all
// - ArgumentSynonymTable: per tool, synonym key -> canonical key

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{Map, Value};

use crate::config::{ConfigError, PatternSet};

// ---------------------------------------------------------------------------
// Tool name resolution
// ---------------------------------------------------------------------------

/// Outcome of looking a tool name up in the alias table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    /// A known canonical tool, reached directly or through an alias.
    Canonical(String),
    /// Not known, but looks like a browser action.
    Browser,
    /// Not known and not browser-like.
    Unresolved,
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    known: BTreeSet<String>,
    aliases: HashMap<String, String>,
    browser_patterns: PatternSet,
}

impl AliasTable {
    /// Build the table. Every alias must point at a known tool.
    pub fn new(
        known: BTreeSet<String>,
        aliases: BTreeMap<String, String>,
        browser_patterns: PatternSet,
    ) -> Result<Self, ConfigError> {
        for (alias, target) in &aliases {
            if !known.contains(target) {
                return Err(ConfigError::Validation(format!(
                    "alias \"{alias}\" points at unknown tool \"{target}\"; add it to known_tools"
                )));
            }
        }
        Ok(Self {
            known,
            aliases: aliases.into_iter().collect(),
            browser_patterns,
        })
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn resolve(&self, name: &str) -> NameResolution {
        if name.is_empty() {
            return NameResolution::Unresolved;
        }
        if self.known.contains(name) {
            return NameResolution::Canonical(name.to_string());
        }
        if let Some(target) = self.aliases.get(name) {
            return NameResolution::Canonical(target.clone());
        }
        if self.browser_patterns.first_match(name).is_some() {
            return NameResolution::Browser;
        }
        NameResolution::Unresolved
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn alias_len(&self) -> usize {
        self.aliases.len()
    }
}

// ---------------------------------------------------------------------------
// Argument synonyms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ArgumentSynonymTable {
    by_tool: HashMap<String, HashMap<String, String>>,
}

impl ArgumentSynonymTable {
    /// Build the table, rejecting any tool whose synonym keys overlap its
    /// canonical keys. That overlap is the only way normalization could
    /// change an already-canonical argument set.
    pub fn new(
        by_tool: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        for (tool, synonyms) in &by_tool {
            let targets: BTreeSet<&String> = synonyms.values().collect();
            if let Some(key) = synonyms.keys().find(|k| targets.contains(k)) {
                return Err(ConfigError::CyclicSynonym {
                    tool: tool.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(Self {
            by_tool: by_tool
                .into_iter()
                .map(|(tool, map)| (tool, map.into_iter().collect()))
                .collect(),
        })
    }

    /// Canonical key for `key` on `tool`. Exact, case-sensitive match.
    pub fn canonical_key<'a>(&'a self, tool: &str, key: &'a str) -> &'a str {
        self.by_tool
            .get(tool)
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .unwrap_or(key)
    }

    /// Rename every key of `args` to its canonical form, preserving the
    /// position of each key's first occurrence. When two keys collapse onto
    /// one canonical key, the later value wins.
    pub fn normalize(&self, tool: &str, args: Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(args.len());
        for (key, value) in args {
            let canonical = self.canonical_key(tool, &key).to_string();
            if out.contains_key(&canonical) {
                tracing::debug!(tool, key = %key, canonical = %canonical, "argument synonym collision; later value wins");
            }
            out.insert(canonical, value);
        }
        out
    }

    pub fn tool_count(&self) -> usize {
        self.by_tool.len()
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// All read-only tool tables, shared by every session.
#[derive(Debug, Clone, Default)]
pub struct ToolTables {
    pub aliases: AliasTable,
    pub synonyms: ArgumentSynonymTable,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

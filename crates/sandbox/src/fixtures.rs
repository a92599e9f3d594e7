// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canned tool outputs for mock sandboxes.
//!
//! Fixtures are keyed by tool name and loaded from `<dir>/<tool>.txt`,
//! cached after first read. Tests can also insert fixtures directly.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

/// Placeholder output when no fixture exists for a tool.
const PLACEHOLDER: &str = "Mock output (fixture not found)";

#[derive(Debug, Default)]
pub struct FixtureStore {
    dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, String>>,
}

impl FixtureStore {
    /// A store with no backing directory; serves only inserted fixtures.
    pub fn empty() -> Self {
        FixtureStore::default()
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        FixtureStore { dir: Some(dir.into()), cache: Mutex::new(HashMap::new()) }
    }

    /// Register a fixture directly (tests).
    pub fn insert(&self, tool: &str, output: impl Into<String>) {
        self.cache.lock().insert(tool.to_string(), output.into());
    }

    /// Fetch the canned output for a tool, falling back to a placeholder.
    pub fn load(&self, tool: &str) -> String {
        if let Some(cached) = self.cache.lock().get(tool) {
            return cached.clone();
        }
        if let Some(dir) = &self.dir {
            if let Ok(content) = std::fs::read_to_string(dir.join(format!("{tool}.txt"))) {
                self.cache.lock().insert(tool.to_string(), content.clone());
                return content;
            }
        }
        PLACEHOLDER.to_string()
    }
}

#[cfg(test)]
#[path = "fixtures_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoding of reasoner output.
//!
//! Reasoners return prose that may embed a JSON block
//! `{"tools": [...], "reasoning": "..."}`, sometimes wrapped in a Markdown
//! code fence. Decoding strips the fence, extracts the block between the
//! first `{` and the last `}`, and falls back to `None` when nothing
//! parses.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Structured tool recommendation embedded in a reasoner command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolPlan {
    pub tools: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        // Opening fence with optional language tag, and the closing fence.
        #[allow(clippy::unwrap_used)]
        Regex::new(r"```[a-zA-Z0-9_-]*\n?|```").unwrap()
    })
}

/// Remove Markdown code fences. Fenced and un-fenced content decode to the
/// same value.
pub fn strip_markdown_fence(text: &str) -> String {
    fence_regex().replace_all(text, "").trim().to_string()
}

/// Extract and parse the embedded `{"tools": [...]}` block, if any.
pub fn extract_tool_plan(command: &str) -> Option<ToolPlan> {
    let stripped = strip_markdown_fence(command);
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    let block = &stripped[start..=end];
    serde_json::from_str::<ToolPlan>(block).ok().filter(|plan| !plan.tools.is_empty())
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;

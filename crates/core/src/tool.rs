// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalised tool invocation results.
//!
//! Tool execution never fails a caller with an error: every failure mode
//! (timeout, sandbox crash, non-zero exit, internal exception, pool
//! exhaustion) is encoded in the result's error class.

use serde::{Deserialize, Serialize};

use crate::finding::Finding;

/// Classification of a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorClass {
    Timeout,
    NonZeroExit,
    SandboxCrashed,
    ExecutionException,
    PoolExhausted,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ToolErrorClass>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ToolResult {
    /// A successful invocation with captured output.
    pub fn ok(tool: impl Into<String>, stdout: impl Into<String>, duration_ms: u64) -> Self {
        ToolResult {
            tool: tool.into(),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms,
            error_class: None,
            findings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A failed invocation tagged with an error class.
    pub fn failed(
        tool: impl Into<String>,
        class: ToolErrorClass,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let message = message.into();
        ToolResult {
            tool: tool.into(),
            success: false,
            stdout: String::new(),
            stderr: message.clone(),
            exit_code: -1,
            duration_ms,
            error_class: Some(class),
            findings: Vec::new(),
            errors: vec![message],
        }
    }

    /// A failure that never reached the sandbox (unknown tool, bad input).
    pub fn rejected(tool: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        ToolResult {
            tool: tool.into(),
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration_ms: 0,
            error_class: None,
            findings: Vec::new(),
            errors: vec![message],
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated, immutable finding records.
//!
//! A finding is created once by a tool adapter (or promoted by an agent)
//! and never mutated afterwards. All invariants are enforced at
//! construction time so downstream components can trust the record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Severity of a finding, from the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// True for `high` and `critical`.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from finding construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FindingError {
    #[error("finding id is not a UUID: {0}")]
    BadId(String),

    #[error("unknown severity: {0}")]
    BadSeverity(String),

    #[error("target must be non-empty and contain no whitespace: {0:?}")]
    BadTarget(String),

    #[error("timestamp is not ISO-8601: {0}")]
    BadTimestamp(String),
}

/// A normalised record of something observed during an engagement.
///
/// Invariants (checked by [`Finding::from_parts`]):
/// - `id` parses as a UUID
/// - `severity` is from the closed set
/// - `target` is non-empty and whitespace-free
/// - `timestamp` is an ISO-8601 UTC instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    pub name: String,
    pub target: String,
    pub evidence: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub topic: String,
    pub signature: String,
    /// Tool-specific structured detail (ports, subdomains, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl Finding {
    /// Create a finding with a fresh UUID, the current UTC time, and a
    /// derived content signature.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        finding_type: impl Into<String>,
        severity: Severity,
        name: impl Into<String>,
        target: impl Into<String>,
        evidence: impl Into<String>,
        agent_id: impl Into<String>,
        tool: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self, FindingError> {
        let target = target.into();
        validate_target(&target)?;
        let mut finding = Finding {
            id: uuid::Uuid::new_v4().to_string(),
            finding_type: finding_type.into(),
            severity,
            name: name.into(),
            target,
            evidence: evidence.into(),
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            tool: tool.into(),
            topic: topic.into(),
            signature: String::new(),
            detail: serde_json::Value::Null,
        };
        finding.signature = finding.content_signature();
        Ok(finding)
    }

    /// Attach tool-specific structured detail, re-deriving the signature.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self.signature = self.content_signature();
        self
    }

    /// Reconstruct a finding from raw parts, enforcing every invariant.
    ///
    /// Used when findings come back from a checkpoint or from an external
    /// adapter that built the record by hand.
    pub fn from_parts(value: serde_json::Value) -> Result<Self, FindingError> {
        let finding: Finding = serde_json::from_value(value.clone()).map_err(|_| {
            // Decode failures are almost always one of the two enum-ish
            // fields; report the more specific error where possible.
            let severity = value.get("severity").and_then(|v| v.as_str()).unwrap_or("");
            if Severity::parse(severity).is_none() {
                return FindingError::BadSeverity(severity.to_string());
            }
            let ts = value.get("timestamp").and_then(|v| v.as_str()).unwrap_or("");
            FindingError::BadTimestamp(ts.to_string())
        })?;
        if uuid::Uuid::parse_str(&finding.id).is_err() {
            return Err(FindingError::BadId(finding.id));
        }
        validate_target(&finding.target)?;
        Ok(finding)
    }

    /// SHA-256 over the identifying content of the record.
    pub fn content_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.finding_type.as_bytes());
        hasher.update(self.severity.as_str().as_bytes());
        hasher.update(self.target.as_bytes());
        hasher.update(self.evidence.as_bytes());
        hasher.update(self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// First 8 hex characters of SHA-256 of the target string. Used to derive
/// per-target channel names.
pub fn target_hash(target: &str) -> String {
    let digest = Sha256::digest(target.as_bytes());
    let hex = format!("{digest:x}");
    hex[..8].to_string()
}

fn validate_target(target: &str) -> Result<(), FindingError> {
    if target.is_empty() || target.chars().any(char::is_whitespace) {
        return Err(FindingError::BadTarget(target.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "finding_tests.rs"]
mod tests;

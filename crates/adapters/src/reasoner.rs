// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reasoner seam.
//!
//! The runtime never talks to an LLM provider directly: it hands a compact
//! context view to a [`Reasoner`] and receives one of three decisions back.
//! Provider selection, routing, and rate limiting all live behind this
//! trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Complexity tier a caller can request for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Compact view of the engagement handed to the reasoner each iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerContext {
    pub target: String,
    pub phase: String,
    /// Last findings projected to `{type, severity, name}`.
    pub findings: Vec<serde_json::Value>,
    pub total_findings: usize,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_command: Option<String>,
}

/// What the reasoner decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Decision {
    /// Abort the engagement; the plan was rejected.
    #[serde(rename = "VETOED")]
    Vetoed { reason: String },

    /// Objective achieved; terminate successfully.
    #[serde(rename = "COMPLETE")]
    Complete,

    /// Proceed; `command` encodes the recommended tool set.
    #[serde(rename = "CONTINUE")]
    Command { command: String },
}

#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error("reasoner unavailable: {0}")]
    Unavailable(String),

    #[error("reasoner request timed out after {0}s")]
    Timeout(u64),
}

/// External decision component, consumed via this interface only.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn decide(
        &self,
        context: &ReasonerContext,
        tier: Complexity,
    ) -> Result<Decision, ReasonerError>;

    /// Lightweight reachability probe for preflight.
    async fn ping(&self) -> Result<(), ReasonerError>;
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted reasoner for tests: replays queued decisions and records
    /// the contexts it was shown.
    pub struct FakeReasoner {
        script: Mutex<VecDeque<Decision>>,
        pub calls: Mutex<Vec<ReasonerContext>>,
        pub reachable: std::sync::atomic::AtomicBool,
    }

    impl FakeReasoner {
        pub fn new(script: impl IntoIterator<Item = Decision>) -> Self {
            FakeReasoner {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                reachable: std::sync::atomic::AtomicBool::new(true),
            }
        }

        /// A reasoner that always asks for the same command.
        pub fn always(command: impl Into<String>) -> Self {
            let command = command.into();
            let fake = FakeReasoner::new([]);
            fake.script.lock().push_back(Decision::Command { command });
            fake
        }
    }

    #[async_trait]
    impl Reasoner for FakeReasoner {
        async fn decide(
            &self,
            context: &ReasonerContext,
            _tier: Complexity,
        ) -> Result<Decision, ReasonerError> {
            self.calls.lock().push(context.clone());
            let mut script = self.script.lock();
            match script.len() {
                0 => Ok(Decision::Complete),
                // Keep replaying the final decision once the script is spent.
                1 => Ok(script[0].clone()),
                _ => Ok(script.pop_front().unwrap_or(Decision::Complete)),
            }
        }

        async fn ping(&self) -> Result<(), ReasonerError> {
            if self.reachable.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ReasonerError::Unavailable("fake reasoner offline".to_string()))
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeReasoner;

#[cfg(test)]
#[path = "reasoner_tests.rs"]
mod tests;

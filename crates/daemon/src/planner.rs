// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline planner: the reasoner the daemon falls back to when no
//! external decision component is wired in.
//!
//! Deterministic and LLM-free: it walks the kill chain palette phase by
//! phase and completes once the loop has covered the chain. Useful for
//! dry runs and for operating with the reasoning tier offline.

use async_trait::async_trait;
use serde_json::json;

use opfor_adapters::{Complexity, Decision, Reasoner, ReasonerContext, ReasonerError};

pub struct OfflinePlanner;

fn tools_for_phase(phase: &str) -> &'static [&'static str] {
    match phase {
        "RECON" => &["nmap", "subfinder"],
        "VULN_SCAN" => &["nuclei", "nikto"],
        "EXPLOIT" => &["sqlmap", "hydra"],
        "POST_EXPLOIT" => &["crackmapexec"],
        _ => &["nmap"],
    }
}

#[async_trait]
impl Reasoner for OfflinePlanner {
    async fn decide(
        &self,
        context: &ReasonerContext,
        _tier: Complexity,
    ) -> Result<Decision, ReasonerError> {
        // One pass per phase, then wind down.
        if context.iteration > 4 || context.phase == "POST_EXPLOIT" && context.iteration > 3 {
            return Ok(Decision::Complete);
        }
        let plan = json!({
            "tools": tools_for_phase(&context.phase),
            "reasoning": format!("offline palette for {}", context.phase),
        });
        Ok(Decision::Command { command: plan.to_string() })
    }

    async fn ping(&self) -> Result<(), ReasonerError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;

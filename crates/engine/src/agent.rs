// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reasoner-directed attack loop.
//!
//! Each iteration consults the reasoner first, parses a tool set out of its
//! command, executes the tools in parallel, folds the findings back into
//! the context view, and yields. Cancellation is cooperative through the
//! shared active flag and the halt switch; any unexpected failure logs a
//! terminal event and exits cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use opfor_adapters::{extract_tool_plan, Complexity, Decision, Reasoner, ReasonerContext, ToolOptions};
use opfor_bus::EventBus;
use opfor_core::{AgentId, Finding, ToolResult};

use crate::halt::HaltSwitch;
use crate::orchestrator::ToolOrchestrator;

/// Maximum tools accepted from one reasoner decision.
const MAX_TOOLS_PER_ITERATION: usize = 8;

/// Substring → tool synonyms for unstructured reasoner output.
const SYNONYMS: &[(&str, &str)] = &[
    ("port scan", "nmap"),
    ("port-scan", "nmap"),
    ("vulnerability", "nuclei"),
    ("vuln", "nuclei"),
    ("sql injection", "sqlmap"),
    ("sqli", "sqlmap"),
];

#[derive(Debug, Clone)]
pub struct AttackAgentConfig {
    pub max_iterations: u32,
    /// Pause between iterations.
    pub iteration_pause: Duration,
}

impl Default for AttackAgentConfig {
    fn default() -> Self {
        AttackAgentConfig { max_iterations: 10, iteration_pause: Duration::from_secs(2) }
    }
}

/// Outcome of one engage loop.
#[derive(Debug)]
pub struct EngageReport {
    pub iterations: u32,
    pub findings: Vec<Finding>,
    pub completed: bool,
    pub vetoed: Option<String>,
    pub halted: bool,
}

pub struct AttackAgent {
    id: AgentId,
    reasoner: Arc<dyn Reasoner>,
    orchestrator: ToolOrchestrator,
    bus: EventBus,
    halt: Arc<HaltSwitch>,
    active: Arc<AtomicBool>,
    config: AttackAgentConfig,
}

impl AttackAgent {
    pub fn new(
        id: AgentId,
        reasoner: Arc<dyn Reasoner>,
        orchestrator: ToolOrchestrator,
        bus: EventBus,
        halt: Arc<HaltSwitch>,
    ) -> Self {
        AttackAgent {
            id,
            reasoner,
            orchestrator,
            bus,
            halt,
            active: Arc::new(AtomicBool::new(true)),
            config: AttackAgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AttackAgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Shared cooperative-cancellation flag; clearing it stops the loop at
    /// the next iteration boundary.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// The reasoner-directed loop, bounded by the iteration budget.
    pub async fn engage(&self, target: &str) -> EngageReport {
        let target = sanitize_target(target);
        let mut findings: Vec<Finding> = Vec::new();
        let mut previous_command: Option<String> = None;
        let mut report = EngageReport {
            iterations: 0,
            findings: Vec::new(),
            completed: false,
            vetoed: None,
            halted: false,
        };

        info!(agent_id = %self.id, %target, "engaging target");
        self.set_status("initializing", &target).await;
        self.log(format!("Target acquired: {target}"), "INFO").await;

        while self.active.load(Ordering::SeqCst)
            && report.iterations < self.config.max_iterations
        {
            report.iterations += 1;
            if self.halt.check_frozen(self.id.as_str()).is_err() {
                self.log("Halt flag observed, stopping".to_string(), "WARN").await;
                report.halted = true;
                break;
            }
            self.log(format!("Iteration {}", report.iterations), "PHASE").await;

            // Consult the reasoner before any tool runs.
            self.set_status("thinking", &target).await;
            let phase = determine_phase(&findings);
            let context = ReasonerContext {
                target: target.clone(),
                phase: phase.to_string(),
                findings: findings
                    .iter()
                    .rev()
                    .take(20)
                    .rev()
                    .map(|f| {
                        json!({
                            "type": f.finding_type,
                            "severity": f.severity,
                            "name": f.name,
                        })
                    })
                    .collect(),
                total_findings: findings.len(),
                iteration: report.iterations,
                previous_command: previous_command.clone(),
            };
            let tier =
                if phase.starts_with("EXPLOIT") { Complexity::High } else { Complexity::Medium };

            let decision = match self.reasoner.decide(&context, tier).await {
                Ok(decision) => decision,
                Err(e) => {
                    error!(agent_id = %self.id, error = %e, "reasoner failed, terminating");
                    self.log(format!("Attack error: {e}"), "ERROR").await;
                    break;
                }
            };

            let command = match decision {
                Decision::Vetoed { reason } => {
                    self.log(format!("VETOED: {reason}"), "CRITIC").await;
                    report.vetoed = Some(reason);
                    break;
                }
                Decision::Complete => {
                    self.log("Objective achieved".to_string(), "SUCCESS").await;
                    report.completed = true;
                    break;
                }
                Decision::Command { command } => command,
            };
            self.log(format!("Strategy: {}", opfor_core::id::short(&command, 200)), "STRATEGY")
                .await;

            // Execute the AI-directed tool set.
            self.set_status("attacking", &target).await;
            let tools = self.parse_tools(&command, report.iterations);
            self.log(format!("Running tools: {tools:?}"), "INFO").await;
            let results =
                self.orchestrator.run_parallel(&target, &tools, &ToolOptions::default()).await;

            // Integrate findings.
            self.set_status("analyzing", &target).await;
            let new_findings = self.integrate(&results).await;
            findings.extend(new_findings);
            previous_command = Some(command);

            // Brief yield before the next iteration.
            tokio::time::sleep(self.config.iteration_pause).await;
        }

        self.log_completion(&findings).await;
        self.set_status("idle", &target).await;
        report.findings = findings;
        report
    }

    /// Shortcut path: one nmap + nuclei pair, no reasoning loop.
    pub async fn quick_attack(&self, target: &str) -> Vec<ToolResult> {
        let target = sanitize_target(target);
        self.set_status("quick_scan", &target).await;
        self.log(format!("Quick scan: {target}"), "INFO").await;

        let tools = vec!["nmap".to_string(), "nuclei".to_string()];
        let results =
            self.orchestrator.run_parallel(&target, &tools, &ToolOptions::default()).await;
        self.integrate(&results).await;

        self.log("Quick scan complete".to_string(), "SUCCESS").await;
        self.set_status("idle", &target).await;
        results
    }

    /// Log per-tool outcomes, publish findings, and echo actionable ones to
    /// the brain channel. Returns the new findings.
    async fn integrate(&self, results: &[ToolResult]) -> Vec<Finding> {
        let mut new_findings = Vec::new();
        for result in results {
            if result.success {
                self.log(
                    format!("{}: {} findings", result.tool, result.findings.len()),
                    if result.findings.is_empty() { "INFO" } else { "SUCCESS" },
                )
                .await;
                new_findings.extend(result.findings.iter().cloned());
            } else {
                let detail = result.errors.first().map(String::as_str).unwrap_or("failed");
                self.log(
                    format!("{}: {}", result.tool, opfor_core::id::short(detail, 100)),
                    "ERROR",
                )
                .await;
            }
        }

        for finding in &new_findings {
            let mut stamped = finding.clone();
            stamped.agent_id = self.id.as_str().to_string();
            let _ = self.bus.publish_finding(&stamped).await;
            if stamped.severity.is_actionable() {
                let _ = self
                    .bus
                    .publish(
                        "swarm:brain",
                        json!({
                            "category": stamped.severity.as_str().to_uppercase(),
                            "text": format!("[{}] {}", stamped.severity, stamped.name),
                        }),
                    )
                    .await;
            }
        }
        new_findings
    }

    /// Tool names from a reasoner command: structured JSON block first,
    /// then substring/synonym matching, then the hard fallback.
    fn parse_tools(&self, command: &str, iteration: u32) -> Vec<String> {
        let available = self.orchestrator.available_tools();

        if let Some(plan) = extract_tool_plan(command) {
            let mut valid: Vec<String> = plan
                .tools
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| available.contains(t))
                .collect();
            valid.dedup();
            if !valid.is_empty() {
                valid.truncate(MAX_TOOLS_PER_ITERATION);
                info!(agent_id = %self.id, tools = ?valid, "parsed tools from JSON plan");
                return valid;
            }
        }

        let lower = command.to_lowercase();
        let mut found: Vec<String> =
            available.iter().filter(|tool| lower.contains(tool.as_str())).cloned().collect();
        for (needle, tool) in SYNONYMS {
            if lower.contains(needle)
                && available.iter().any(|t| t == tool)
                && !found.iter().any(|t| t == tool)
            {
                found.push(tool.to_string());
            }
        }
        found.truncate(MAX_TOOLS_PER_ITERATION);
        if !found.is_empty() {
            return found;
        }

        let fallback = if iteration == 1 { "nmap" } else { "nuclei" };
        vec![fallback.to_string()]
    }

    async fn set_status(&self, state: &str, task: &str) {
        let _ = self
            .bus
            .publish_agent_status(
                self.id.as_str(),
                json!({
                    "state": state,
                    "task": task,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
    }

    async fn log(&self, message: String, category: &str) {
        let _ = self
            .bus
            .publish(
                "swarm:log",
                json!({
                    "agent_id": self.id.as_str(),
                    "category": category,
                    "message": message,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        if matches!(category, "STRATEGY" | "THINKING" | "ERROR" | "CRITIC") {
            let _ = self
                .bus
                .publish("swarm:brain", json!({"category": category, "text": message}))
                .await;
        }
    }

    async fn log_completion(&self, findings: &[Finding]) {
        let critical =
            findings.iter().filter(|f| f.severity == opfor_core::Severity::Critical).count();
        let high = findings.iter().filter(|f| f.severity == opfor_core::Severity::High).count();
        self.log(
            format!(
                "Attack complete: {} findings ({critical} critical, {high} high)",
                findings.len()
            ),
            "SUCCESS",
        )
        .await;
    }
}

/// Phase derived from accumulated finding types.
pub(crate) fn determine_phase(findings: &[Finding]) -> &'static str {
    let has = |kinds: &[&str]| {
        findings.iter().any(|f| kinds.contains(&f.finding_type.as_str()))
    };
    if has(&["shell"]) {
        "POST_EXPLOIT"
    } else if has(&["credential"]) || has(&["vulnerability", "sqli", "rce"]) {
        "EXPLOIT"
    } else if has(&["port_scan"]) {
        "VULN_SCAN"
    } else {
        "RECON"
    }
}

/// Strip scheme, path, and trailing slash from operator-supplied targets.
pub fn sanitize_target(target: &str) -> String {
    let trimmed = target.trim();
    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);
    without_scheme
        .trim_end_matches('/')
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;

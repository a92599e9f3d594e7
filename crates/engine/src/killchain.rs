// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kill chain state machine.
//!
//! Phase progression is findings-driven: each phase runs its candidate
//! tools through the orchestrator, folds the findings into the attack
//! context, and the transition function picks the next phase. After every
//! advance the chain recommends up to five tools for the phase ahead based
//! on what the context now knows.

use std::time::Instant;

use serde_json::json;
use tracing::info;

use opfor_bus::EventBus;
use opfor_core::{AttackContext, Finding, Phase, PhaseResult, Severity};

use crate::orchestrator::ToolOrchestrator;

/// Candidate tools per phase.
pub fn phase_tools(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Recon => &["subfinder", "masscan", "nmap", "whois", "dnsrecon"],
        Phase::Enumeration => &["nmap", "whatweb", "nikto", "enum4linux"],
        Phase::Vulnerability => &["nuclei", "nikto", "wpscan", "sslscan", "sqlmap"],
        Phase::Exploitation => &["sqlmap", "metasploit", "crackmapexec", "hydra"],
        Phase::PostExploit => &["crackmapexec", "impacket", "linpeas"],
        Phase::Exfil => &["netcat", "curl", "scp"],
        Phase::Complete => &[],
    }
}

/// Minimum findings expected before a phase is considered productive.
pub fn phase_threshold(phase: Phase) -> usize {
    match phase {
        Phase::Recon | Phase::Enumeration => 1,
        Phase::Vulnerability => 0,
        Phase::Exploitation | Phase::PostExploit => 1,
        Phase::Exfil | Phase::Complete => 0,
    }
}

/// Maximum tools recommended for the next phase.
const MAX_RECOMMENDATIONS: usize = 5;

/// Drives one engagement through the attack lifecycle.
pub struct KillChain {
    target: String,
    orchestrator: ToolOrchestrator,
    bus: EventBus,
    pub current_phase: Phase,
    pub context: AttackContext,
}

impl KillChain {
    pub fn new(target: impl Into<String>, orchestrator: ToolOrchestrator, bus: EventBus) -> Self {
        let target = target.into();
        KillChain {
            context: AttackContext::new(&target),
            target,
            orchestrator,
            bus,
            current_phase: Phase::Recon,
        }
    }

    /// Execute the current phase and determine the next one.
    pub async fn advance(&mut self) -> PhaseResult {
        let started = Instant::now();
        let tools: Vec<String> =
            phase_tools(self.current_phase).iter().map(|t| t.to_string()).collect();

        info!(phase = %self.current_phase, "executing phase");
        let _ = self
            .bus
            .publish(
                "killchain:phase",
                json!({
                    "phase": self.current_phase.as_str(),
                    "status": "started",
                    "tools": tools,
                }),
            )
            .await;

        let results = self
            .orchestrator
            .run_phase_tools(&self.target, self.current_phase, &tools, &self.context.summary())
            .await;

        let mut findings = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            if result.success {
                self.update_context(&result.findings);
                findings.extend(result.findings);
            } else {
                errors.extend(result.errors);
            }
        }

        let next_phase = self.determine_next_phase(&findings);
        let recommended_tools = self.recommend_tools(next_phase, &findings);
        let result = PhaseResult {
            phase: self.current_phase,
            success: !findings.is_empty() || errors.is_empty(),
            next_phase,
            recommended_tools,
            duration_ms: started.elapsed().as_millis() as u64,
            errors,
            findings,
        };

        self.context.phase_history.push(result.clone());
        self.current_phase = next_phase;

        let _ = self
            .bus
            .publish(
                "killchain:phase",
                json!({
                    "phase": result.phase.as_str(),
                    "status": "completed",
                    "findings_count": result.findings.len(),
                    "next_phase": next_phase.as_str(),
                }),
            )
            .await;

        result
    }

    /// Fold findings into the context by type.
    fn update_context(&mut self, findings: &[Finding]) {
        for finding in findings {
            match finding.finding_type.as_str() {
                "port_scan" => {
                    let host = finding.detail["host"]
                        .as_str()
                        .unwrap_or(&self.target)
                        .to_string();
                    if let Some(ports) = finding.detail["ports"].as_array() {
                        for port in ports {
                            let number = port["port"].as_u64().unwrap_or(0) as u16;
                            let service = port["service"].as_str().unwrap_or("unknown");
                            self.context.add_port(&host, number, service);
                        }
                    }
                    self.context.add_host(&host);
                }
                "vulnerability" | "sqli" | "rce" => {
                    self.context.add_vulnerability(finding.clone())
                }
                "credential" => self.context.add_credential(finding.clone()),
                "shell" => self.context.add_shell(finding.clone()),
                "recon" => {
                    if let Some(subdomains) = finding.detail["subdomains"].as_array() {
                        for subdomain in subdomains.iter().filter_map(|s| s.as_str()) {
                            self.context.add_host(subdomain);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// The transition function over `(current_phase, findings)`.
    fn determine_next_phase(&self, findings: &[Finding]) -> Phase {
        match self.current_phase {
            Phase::Recon => {
                if !self.context.open_ports.is_empty()
                    || !self.context.discovered_hosts.is_empty()
                {
                    Phase::Enumeration
                } else {
                    Phase::Recon
                }
            }
            Phase::Enumeration => Phase::Vulnerability,
            Phase::Vulnerability => {
                if findings.iter().any(|f| f.severity.is_actionable()) {
                    return Phase::Exploitation;
                }
                if findings
                    .iter()
                    .any(|f| matches!(f.severity, Severity::Medium | Severity::Low))
                {
                    return Phase::Vulnerability;
                }
                // Nothing new; with credentials in hand, try exploiting anyway.
                if !self.context.credentials.is_empty() {
                    Phase::Exploitation
                } else {
                    Phase::Vulnerability
                }
            }
            Phase::Exploitation => {
                if findings.iter().any(|f| f.finding_type == "shell") {
                    Phase::PostExploit
                } else {
                    Phase::Exploitation
                }
            }
            Phase::PostExploit => Phase::Exfil,
            Phase::Exfil => Phase::Complete,
            Phase::Complete => Phase::Complete,
        }
    }

    /// Up to five tools for the next phase, context-aware picks first.
    fn recommend_tools(&self, next_phase: Phase, _findings: &[Finding]) -> Vec<String> {
        if next_phase == Phase::Complete {
            return Vec::new();
        }

        let mut picks: Vec<String> = Vec::new();
        let mut push = |tool: &str, picks: &mut Vec<String>| {
            if !picks.iter().any(|t| t == tool) {
                picks.push(tool.to_string());
            }
        };

        match next_phase {
            Phase::Vulnerability => {
                for services in self.context.services.values() {
                    for service in services.values() {
                        let service = service.to_lowercase();
                        if service.contains("http") || service.contains("web") {
                            for tool in ["nuclei", "nikto", "ffuf", "sqlmap"] {
                                push(tool, &mut picks);
                            }
                        }
                        if service.contains("wordpress") {
                            push("wpscan", &mut picks);
                        }
                        if service.contains("ssl") || service.contains("https") {
                            push("sslscan", &mut picks);
                        }
                    }
                }
            }
            Phase::Exploitation => {
                for vuln in &self.context.vulnerabilities {
                    if vuln.finding_type == "sqli" {
                        push("sqlmap", &mut picks);
                    }
                    if vuln.finding_type.contains("web") {
                        push("metasploit", &mut picks);
                    }
                }
                if !self.context.open_ports.is_empty() {
                    push("hydra", &mut picks);
                }
            }
            _ => {}
        }

        for tool in phase_tools(next_phase) {
            push(tool, &mut picks);
        }
        picks.truncate(MAX_RECOMMENDATIONS);
        picks
    }

    /// Compact status view for clients.
    pub fn status(&self) -> serde_json::Value {
        json!({
            "target": self.target,
            "current_phase": self.current_phase.as_str(),
            "phases_completed": self.context.phase_history.len(),
            "discovered_hosts": self.context.discovered_hosts.len(),
            "open_ports": self.context.total_open_ports(),
            "vulnerabilities": self.context.vulnerabilities.len(),
            "credentials": self.context.credentials.len(),
            "shells": self.context.shells.len(),
        })
    }

    /// Run phases until COMPLETE or the phase budget is spent.
    pub async fn run_to_completion(&mut self, max_phases: usize) -> Vec<PhaseResult> {
        let mut results = Vec::new();
        for _ in 0..max_phases {
            if self.current_phase.is_terminal() {
                break;
            }
            let result = self.advance().await;
            info!(
                phase = %result.phase,
                findings = result.findings.len(),
                next = %result.next_phase,
                "phase complete"
            );
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
#[path = "killchain_tests.rs"]
mod tests;

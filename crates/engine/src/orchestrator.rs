// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallel dispatch to tool adapters.
//!
//! The orchestrator is stateless between calls. It never fails a caller:
//! unknown tools, adapter faults, and panicked tasks all come back as
//! failed results, and `run_parallel` preserves input order by writing
//! into a pre-sized slot vector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, warn};

use opfor_adapters::{ToolAdapter, ToolOptions};
use opfor_bus::EventBus;
use opfor_core::{Phase, ToolErrorClass, ToolResult};
use opfor_sandbox::{PoolError, SandboxPool};

/// Command templates for tools that have no adapter. Run verbatim in a
/// sandbox by the generic path.
fn generic_command(tool: &str, target: &str) -> Option<String> {
    let command = match tool {
        "nmap" => format!("nmap -sV -sC {target}"),
        "nuclei" => format!("nuclei -u {target} -severity critical,high -jsonl"),
        "subfinder" => format!("subfinder -d {target} -silent"),
        "nikto" => format!("nikto -h {target}"),
        "whatweb" => format!("whatweb {target}"),
        "whois" => format!("whois {target}"),
        "dnsrecon" => format!("dnsrecon -d {target}"),
        _ => return None,
    };
    Some(command)
}

struct Inner {
    registry: HashMap<String, Arc<dyn ToolAdapter>>,
    pool: SandboxPool,
    bus: EventBus,
}

/// Registry of tool adapters plus the shared sandbox pool and event bus.
#[derive(Clone)]
pub struct ToolOrchestrator {
    inner: Arc<Inner>,
}

impl ToolOrchestrator {
    pub fn new(pool: SandboxPool, bus: EventBus, adapters: Vec<Arc<dyn ToolAdapter>>) -> Self {
        let registry = adapters
            .into_iter()
            .map(|adapter| (adapter.name().to_lowercase(), adapter))
            .collect();
        ToolOrchestrator { inner: Arc::new(Inner { registry, pool, bus }) }
    }

    pub fn available_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.inner.registry.keys().cloned().collect();
        tools.sort();
        tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.inner.registry.contains_key(&name.to_lowercase())
    }

    /// Run one tool. An unregistered name fails without launching anything.
    pub async fn run_tool(&self, tool: &str, target: &str, opts: &ToolOptions) -> ToolResult {
        let Some(adapter) = self.inner.registry.get(&tool.to_lowercase()) else {
            return ToolResult::rejected(tool, format!("Unknown tool: {tool}"));
        };

        info!(tool, target, "running tool");
        let _ = self
            .inner
            .bus
            .publish("orchestrator:tool_start", json!({"tool": tool, "target": target}))
            .await;

        let result = adapter.run(target, opts).await;

        let _ = self
            .inner
            .bus
            .publish(
                "orchestrator:tool_complete",
                json!({
                    "tool": tool,
                    "success": result.success,
                    "findings_count": result.findings.len(),
                }),
            )
            .await;
        result
    }

    /// Run several tools concurrently. The result list has exactly one slot
    /// per input tool, in input order; a crashed task fills its slot with a
    /// synthesised failure.
    pub async fn run_parallel(
        &self,
        target: &str,
        tools: &[String],
        opts: &ToolOptions,
    ) -> Vec<ToolResult> {
        info!(count = tools.len(), target, "running tools in parallel");

        let mut slots: Vec<Option<ToolResult>> = (0..tools.len()).map(|_| None).collect();
        let mut tasks: JoinSet<(usize, ToolResult)> = JoinSet::new();
        for (index, tool) in tools.iter().enumerate() {
            let this = self.clone();
            let tool = tool.clone();
            let target = target.to_string();
            let opts = opts.clone();
            tasks.spawn(async move {
                let result = this.run_tool(&tool, &target, &opts).await;
                (index, result)
            });
        }

        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    slots[index] = Some(result);
                    completed += 1;
                }
                Err(e) => warn!(error = %e, "tool task crashed"),
            }
        }

        let results: Vec<ToolResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ToolResult::failed(
                        tools.get(index).map(String::as_str).unwrap_or("unknown"),
                        ToolErrorClass::ExecutionException,
                        "tool task crashed",
                        0,
                    )
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        let findings: usize = results.iter().map(|r| r.findings.len()).sum();
        info!(succeeded, total = tools.len(), findings, completed, "parallel execution complete");
        results
    }

    /// Run a phase's tool set with phase-appropriate default options.
    /// Tools without an adapter fall back to the generic command path.
    pub async fn run_phase_tools(
        &self,
        target: &str,
        phase: Phase,
        tools: &[String],
        _context: &serde_json::Value,
    ) -> Vec<ToolResult> {
        info!(phase = %phase, ?tools, "running phase tools");
        let _ = self
            .inner
            .bus
            .publish(
                "orchestrator:phase_start",
                json!({"phase": phase.as_str(), "tools": tools, "target": target}),
            )
            .await;

        let opts = phase_options(phase);
        let (available, adapterless): (Vec<String>, Vec<String>) =
            tools.iter().cloned().partition(|t| self.has_tool(t));
        if !adapterless.is_empty() {
            warn!(tools = ?adapterless, "no adapters for some requested tools, using generic path");
        }

        let mut results = if available.is_empty() {
            Vec::new()
        } else {
            self.run_parallel(target, &available, &opts).await
        };
        results.extend(self.run_generic(target, &adapterless).await);

        let _ = self
            .inner
            .bus
            .publish(
                "orchestrator:phase_complete",
                json!({
                    "phase": phase.as_str(),
                    "results_count": results.len(),
                    "findings_count": results.iter().map(|r| r.findings.len()).sum::<usize>(),
                }),
            )
            .await;
        results
    }

    /// Generic path: run hard-coded command templates directly in the
    /// sandbox for tools we have no adapter for. Unknown templates are
    /// skipped.
    async fn run_generic(&self, target: &str, tools: &[String]) -> Vec<ToolResult> {
        let mut results = Vec::new();
        for tool in tools {
            let Some(command) = generic_command(tool, target) else {
                continue;
            };
            results.push(self.execute_raw(tool, &command).await);
        }
        results
    }

    async fn execute_raw(&self, tool: &str, command: &str) -> ToolResult {
        let handle = match self.inner.pool.acquire(Duration::from_secs(30)).await {
            Ok(handle) => handle,
            Err(PoolError::Exhausted { waited_ms }) => {
                return ToolResult::failed(
                    tool,
                    ToolErrorClass::PoolExhausted,
                    format!("no sandbox available after {waited_ms}ms"),
                    waited_ms,
                );
            }
            Err(e) => {
                return ToolResult::failed(tool, ToolErrorClass::ExecutionException, e.to_string(), 0)
            }
        };
        let mut result =
            self.inner.pool.execute(&handle, command, Duration::from_secs(600)).await;
        self.inner.pool.release(handle).await;
        result.tool = tool.to_string();
        result
    }

    /// Fixed two-phase flow: quick recon, then targeted scanning selected
    /// by what recon saw.
    pub async fn smart_scan(&self, target: &str) -> HashMap<String, Vec<ToolResult>> {
        let mut results = HashMap::new();

        info!("smart scan phase 1: quick reconnaissance");
        let recon_tools = vec!["nmap".to_string(), "subfinder".to_string()];
        let recon = self
            .run_parallel(target, &recon_tools, &ToolOptions { quick: true, ..Default::default() })
            .await;

        let has_web = recon.iter().flat_map(|r| &r.findings).any(|finding| {
            finding.detail["ports"]
                .as_array()
                .map(|ports| {
                    ports.iter().any(|p| {
                        let service = p["service"].as_str().unwrap_or("").to_lowercase();
                        service.contains("http") || service.contains("web")
                    })
                })
                .unwrap_or(false)
        });
        results.insert("recon".to_string(), recon);

        info!(has_web, "smart scan phase 2: targeted scanning");
        let mut scan_tools: Vec<String> = Vec::new();
        if has_web {
            scan_tools.extend(["nuclei".to_string(), "nikto".to_string(), "ffuf".to_string()]);
        }
        scan_tools.push("nmap".to_string());
        scan_tools.truncate(3);
        let scanning = self
            .run_parallel(
                target,
                &scan_tools,
                &ToolOptions { version_detection: true, ..Default::default() },
            )
            .await;
        results.insert("scanning".to_string(), scanning);

        results
    }
}

/// Default options per kill chain phase: quick profiles in recon, version
/// detection in enumeration, a severity filter in vulnerability scanning,
/// and aggressive settings in exploitation.
pub(crate) fn phase_options(phase: Phase) -> ToolOptions {
    match phase {
        Phase::Recon => ToolOptions { quick: true, ..Default::default() },
        Phase::Enumeration => ToolOptions { version_detection: true, ..Default::default() },
        Phase::Vulnerability => ToolOptions {
            severity: Some("critical,high".to_string()),
            ..Default::default()
        },
        Phase::Exploitation => ToolOptions { batch: true, level: Some(3), ..Default::default() },
        _ => ToolOptions::default(),
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

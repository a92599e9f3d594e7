// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool adapters: targets and options in, findings out.
//!
//! Each adapter owns its command template, default timeout, retry count,
//! and output parser. Built-in adapters cover the recon/scan palette the
//! kill chain draws from; everything else goes through the orchestrator's
//! generic path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use opfor_core::{target_hash, Finding, Severity, ToolErrorClass, ToolResult};
use opfor_sandbox::{PoolError, SandboxPool};

/// How long to wait for a free sandbox before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Options shared across tools; each adapter applies the ones it
/// understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOptions {
    /// Fast scan profile (recon).
    #[serde(default)]
    pub quick: bool,
    /// Service version detection (enumeration).
    #[serde(default)]
    pub version_detection: bool,
    /// Severity filter, e.g. "critical,high" (vulnerability scanning).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Non-interactive mode (exploitation).
    #[serde(default)]
    pub batch: bool,
    /// Aggressiveness level (exploitation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

/// Input-constraint tags carried in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputConstraints {
    pub requires_url: bool,
    pub requires_ip: bool,
}

/// One supported tool.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn default_timeout(&self) -> Duration;

    fn retries(&self) -> u32;

    fn constraints(&self) -> InputConstraints;

    /// Run the tool against a target. Never errors; all failures are
    /// encoded in the result.
    async fn run(&self, target: &str, opts: &ToolOptions) -> ToolResult;
}

/// Output parser selection for [`CommandTool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputParser {
    /// `80/tcp open http` style port tables.
    PortTable,
    /// One JSON object per line with `info.severity` / `info.name`.
    JsonLines,
    /// One hostname per line.
    HostList,
    /// No parsing; raw output only.
    Raw,
}

type CommandTemplate = fn(&str, &ToolOptions) -> String;

/// Command-template adapter: builds a command line, runs it in a pooled
/// sandbox, and parses stdout into findings.
pub struct CommandTool {
    name: &'static str,
    pool: SandboxPool,
    timeout: Duration,
    retries: u32,
    constraints: InputConstraints,
    template: CommandTemplate,
    parser: OutputParser,
}

impl CommandTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        pool: SandboxPool,
        timeout: Duration,
        retries: u32,
        constraints: InputConstraints,
        template: CommandTemplate,
        parser: OutputParser,
    ) -> Self {
        CommandTool { name, pool, timeout, retries, constraints, template, parser }
    }

    pub fn command_for(&self, target: &str, opts: &ToolOptions) -> String {
        (self.template)(target, opts)
    }

    async fn run_once(&self, command: &str) -> ToolResult {
        let handle = match self.pool.acquire(ACQUIRE_TIMEOUT).await {
            Ok(handle) => handle,
            Err(PoolError::Exhausted { waited_ms }) => {
                return ToolResult::failed(
                    self.name,
                    ToolErrorClass::PoolExhausted,
                    format!("no sandbox available after {waited_ms}ms"),
                    waited_ms,
                );
            }
            Err(e) => {
                return ToolResult::failed(
                    self.name,
                    ToolErrorClass::ExecutionException,
                    e.to_string(),
                    0,
                );
            }
        };
        let result = self.pool.execute(&handle, command, self.timeout).await;
        self.pool.release(handle).await;
        result
    }
}

#[async_trait]
impl ToolAdapter for CommandTool {
    fn name(&self) -> &str {
        self.name
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn retries(&self) -> u32 {
        self.retries
    }

    fn constraints(&self) -> InputConstraints {
        self.constraints
    }

    async fn run(&self, target: &str, opts: &ToolOptions) -> ToolResult {
        let command = self.command_for(target, opts);
        debug!(tool = self.name, %command, "running tool");

        let mut result = self.run_once(&command).await;
        // Sandbox-side faults are worth retrying; timeouts and tool
        // failures are not.
        let mut attempts = 1;
        while !result.success
            && attempts < self.retries
            && matches!(
                result.error_class,
                Some(ToolErrorClass::SandboxCrashed | ToolErrorClass::ExecutionException)
            )
        {
            attempts += 1;
            debug!(tool = self.name, attempts, "retrying after sandbox fault");
            result = self.run_once(&command).await;
        }

        if result.success {
            let findings = parse_findings(self.parser, self.name, target, &result.stdout);
            result = result.with_findings(findings);
        }
        result.tool = self.name.to_string();
        result
    }
}

/// Parse stdout into findings according to the adapter's parser.
pub fn parse_findings(
    parser: OutputParser,
    tool: &str,
    target: &str,
    stdout: &str,
) -> Vec<Finding> {
    match parser {
        OutputParser::PortTable => parse_port_table(tool, target, stdout),
        OutputParser::JsonLines => parse_json_lines(tool, target, stdout),
        OutputParser::HostList => parse_host_list(tool, target, stdout),
        OutputParser::Raw => Vec::new(),
    }
}

fn topic_for(target: &str, finding_type: &str) -> String {
    format!("findings:{}:{}", target_hash(target), finding_type)
}

/// `80/tcp open http` lines → one `port_scan` finding with a ports detail.
fn parse_port_table(tool: &str, target: &str, stdout: &str) -> Vec<Finding> {
    let mut ports = Vec::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let Some(spec) = fields.next() else { continue };
        let Some((port, proto)) = spec.split_once('/') else { continue };
        if !matches!(proto, "tcp" | "udp") {
            continue;
        }
        let Ok(port) = port.parse::<u16>() else { continue };
        if fields.next() != Some("open") {
            continue;
        }
        let service = fields.next().unwrap_or("unknown");
        ports.push(serde_json::json!({"port": port, "service": service}));
    }
    if ports.is_empty() {
        return Vec::new();
    }
    let count = ports.len();
    match Finding::new(
        "port_scan",
        Severity::Info,
        format!("{count} open port(s) on {target}"),
        target,
        stdout.trim(),
        "",
        tool,
        topic_for(target, "port_scan"),
    ) {
        Ok(finding) => {
            vec![finding.with_detail(serde_json::json!({"host": target, "ports": ports}))]
        }
        Err(_) => Vec::new(),
    }
}

/// JSONL scanner output → one finding per line.
fn parse_json_lines(tool: &str, target: &str, stdout: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in stdout.lines().filter(|l| l.trim_start().starts_with('{')) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else { continue };
        let info = &value["info"];
        let severity = info["severity"]
            .as_str()
            .and_then(Severity::parse)
            .unwrap_or(Severity::Info);
        let name = info["name"]
            .as_str()
            .or_else(|| value["template-id"].as_str())
            .unwrap_or("unnamed finding");
        let template = value["template-id"].as_str().unwrap_or("").to_lowercase();
        let finding_type = if template.contains("sqli") || name.to_lowercase().contains("sql") {
            "sqli"
        } else if template.contains("rce") {
            "rce"
        } else {
            "vulnerability"
        };
        if let Ok(finding) = Finding::new(
            finding_type,
            severity,
            name,
            target,
            line.trim(),
            "",
            tool,
            topic_for(target, finding_type),
        ) {
            findings.push(finding);
        }
    }
    findings
}

/// One hostname per line → a single `recon` finding with subdomains detail.
fn parse_host_list(tool: &str, target: &str, stdout: &str) -> Vec<Finding> {
    let hosts: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains(' ') && l.contains('.'))
        .collect();
    if hosts.is_empty() {
        return Vec::new();
    }
    match Finding::new(
        "recon",
        Severity::Info,
        format!("{} subdomain(s) of {target}", hosts.len()),
        target,
        stdout.trim(),
        "",
        tool,
        topic_for(target, "recon"),
    ) {
        Ok(finding) => vec![finding.with_detail(serde_json::json!({"subdomains": hosts}))],
        Err(_) => Vec::new(),
    }
}

// ─── command templates ───

fn nmap_command(target: &str, opts: &ToolOptions) -> String {
    if opts.quick {
        format!("nmap -T4 -F {target}")
    } else if opts.version_detection {
        format!("nmap -sV -sC {target}")
    } else {
        format!("nmap -sV {target}")
    }
}

fn nuclei_command(target: &str, opts: &ToolOptions) -> String {
    match &opts.severity {
        Some(severity) => format!("nuclei -u {target} -severity {severity} -jsonl"),
        None => format!("nuclei -u {target} -jsonl"),
    }
}

fn sqlmap_command(target: &str, opts: &ToolOptions) -> String {
    let mut command = format!("sqlmap -u http://{target}/ --batch");
    if let Some(level) = opts.level {
        command.push_str(&format!(" --level {level}"));
    }
    command
}

fn hydra_command(target: &str, _opts: &ToolOptions) -> String {
    format!("hydra -L users.txt -P passwords.txt {target} ssh")
}

fn ffuf_command(target: &str, _opts: &ToolOptions) -> String {
    format!("ffuf -u http://{target}/FUZZ -w wordlist.txt -json")
}

fn nikto_command(target: &str, _opts: &ToolOptions) -> String {
    format!("nikto -h {target}")
}

fn subfinder_command(target: &str, _opts: &ToolOptions) -> String {
    format!("subfinder -d {target} -silent")
}

fn masscan_command(target: &str, opts: &ToolOptions) -> String {
    if opts.quick {
        format!("masscan {target} -p0-1000 --rate 10000")
    } else {
        format!("masscan {target} -p0-65535 --rate 1000")
    }
}

/// The built-in adapter set with its per-tool timeouts and retry counts.
pub fn builtin_adapters(pool: &SandboxPool) -> Vec<Arc<dyn ToolAdapter>> {
    let secs = Duration::from_secs;
    let url = InputConstraints { requires_url: true, requires_ip: false };
    let ip = InputConstraints { requires_url: false, requires_ip: true };
    let none = InputConstraints::default();
    vec![
        Arc::new(CommandTool::new(
            "nmap",
            pool.clone(),
            secs(600),
            2,
            none,
            nmap_command,
            OutputParser::PortTable,
        )),
        Arc::new(CommandTool::new(
            "nuclei",
            pool.clone(),
            secs(900),
            2,
            none,
            nuclei_command,
            OutputParser::JsonLines,
        )),
        Arc::new(CommandTool::new(
            "sqlmap",
            pool.clone(),
            secs(600),
            2,
            url,
            sqlmap_command,
            OutputParser::Raw,
        )),
        Arc::new(CommandTool::new(
            "hydra",
            pool.clone(),
            secs(1200),
            2,
            none,
            hydra_command,
            OutputParser::Raw,
        )),
        Arc::new(CommandTool::new(
            "ffuf",
            pool.clone(),
            secs(600),
            2,
            url,
            ffuf_command,
            OutputParser::Raw,
        )),
        Arc::new(CommandTool::new(
            "nikto",
            pool.clone(),
            secs(900),
            2,
            none,
            nikto_command,
            OutputParser::Raw,
        )),
        Arc::new(CommandTool::new(
            "subfinder",
            pool.clone(),
            secs(600),
            2,
            none,
            subfinder_command,
            OutputParser::HostList,
        )),
        Arc::new(CommandTool::new(
            "masscan",
            pool.clone(),
            secs(300),
            2,
            ip,
            masscan_command,
            OutputParser::PortTable,
        )),
    ]
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Recorded adapter invocation.
    #[derive(Debug, Clone)]
    pub struct ToolCall {
        pub target: String,
        pub opts: ToolOptions,
    }

    /// Scripted adapter for tests: returns canned results, records calls,
    /// and can hold each run for a configurable delay.
    pub struct FakeToolAdapter {
        name: String,
        results: Mutex<Vec<ToolResult>>,
        pub calls: Mutex<Vec<ToolCall>>,
        delay: Duration,
    }

    impl FakeToolAdapter {
        pub fn new(name: impl Into<String>, results: Vec<ToolResult>) -> Self {
            FakeToolAdapter {
                name: name.into(),
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        /// Adapter that always succeeds with the given findings.
        pub fn succeeding(name: impl Into<String>, findings: Vec<Finding>) -> Self {
            let name = name.into();
            let result = ToolResult::ok(name.clone(), "fake output", 5).with_findings(findings);
            FakeToolAdapter::new(name, vec![result])
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl ToolAdapter for FakeToolAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(300)
        }

        fn retries(&self) -> u32 {
            1
        }

        fn constraints(&self) -> InputConstraints {
            InputConstraints::default()
        }

        async fn run(&self, target: &str, opts: &ToolOptions) -> ToolResult {
            self.calls.lock().push(ToolCall {
                target: target.to_string(),
                opts: opts.clone(),
            });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut results = self.results.lock();
            match results.len() {
                0 => ToolResult::ok(&self.name, "", 0),
                1 => results[0].clone(),
                _ => results.remove(0),
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeToolAdapter, ToolCall};

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;

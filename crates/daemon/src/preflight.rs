// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered environment checks before engagement start.
//!
//! P0 checks block; P1 checks warn and need operator acknowledgment.
//! Checks take injected probe functions so tests run without a live
//! broker, reasoner, or Docker daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use opfor_adapters::Reasoner;
use opfor_bus::Broker;

/// Minimum hours of validity left on the C2 certificate.
const CERT_MIN_HOURS_REMAINING: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckPriority {
    /// Blocking: the engagement cannot start.
    P0,
    /// Warning: requires acknowledgment.
    P1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub priority: CheckPriority,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl CheckResult {
    fn new(
        name: &str,
        status: CheckStatus,
        priority: CheckPriority,
        message: impl Into<String>,
    ) -> Self {
        CheckResult {
            name: name.to_string(),
            status,
            priority,
            message: message.into(),
            details: Value::Null,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Environment handed to every check.
#[derive(Debug, Clone, Default)]
pub struct PreflightConfig {
    pub scope_path: Option<PathBuf>,
    pub storage_path: PathBuf,
    pub c2_enabled: bool,
    pub c2_cert_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Preflight check failed: {}", summarize(.0))]
    Blocking(Vec<CheckResult>),

    #[error("Preflight warnings require acknowledgment: {}", summarize(.0))]
    Warnings(Vec<CheckResult>),
}

fn summarize(results: &[CheckResult]) -> String {
    results
        .iter()
        .map(|r| format!("{} ({})", r.name, r.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> CheckPriority;
    async fn execute(&self, config: &PreflightConfig) -> CheckResult;
}

// ─── broker ───

pub struct BrokerCheck {
    broker: Arc<dyn Broker>,
}

impl BrokerCheck {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        BrokerCheck { broker }
    }
}

#[async_trait]
impl PreflightCheck for BrokerCheck {
    fn name(&self) -> &'static str {
        "BROKER_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P0
    }

    async fn execute(&self, _config: &PreflightConfig) -> CheckResult {
        if self.broker.is_connected() {
            CheckResult::new(self.name(), CheckStatus::Pass, self.priority(), "Broker reachable")
        } else {
            CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "Broker connection failed",
            )
        }
    }
}

// ─── reasoner ───

pub struct ReasonerCheck {
    reasoner: Arc<dyn Reasoner>,
}

impl ReasonerCheck {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        ReasonerCheck { reasoner }
    }
}

#[async_trait]
impl PreflightCheck for ReasonerCheck {
    fn name(&self) -> &'static str {
        "REASONER_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P0
    }

    async fn execute(&self, _config: &PreflightConfig) -> CheckResult {
        match self.reasoner.ping().await {
            Ok(()) => CheckResult::new(
                self.name(),
                CheckStatus::Pass,
                self.priority(),
                "Reasoner reachable and responding",
            ),
            Err(e) => CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                format!("Reasoner ping failed: {e}"),
            ),
        }
    }
}

// ─── scope file ───

#[derive(Default)]
pub struct ScopeCheck;

#[async_trait]
impl PreflightCheck for ScopeCheck {
    fn name(&self) -> &'static str {
        "SCOPE_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P0
    }

    async fn execute(&self, config: &PreflightConfig) -> CheckResult {
        let Some(path) = &config.scope_path else {
            return CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "Scope configuration missing scope path",
            );
        };
        if !path.exists() {
            return CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                format!("Scope file not found: {}", path.display()),
            );
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return CheckResult::new(
                    self.name(),
                    CheckStatus::Fail,
                    self.priority(),
                    format!("Scope file unreadable: {e}"),
                )
            }
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&content) {
            Ok(serde_yaml::Value::Mapping(map)) if !map.is_empty() => {
                CheckResult::new(self.name(), CheckStatus::Pass, self.priority(), "Scope file valid")
            }
            Ok(_) => CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "Scope file must be a non-empty YAML mapping",
            ),
            Err(e) => CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                format!("Scope parse error: {e}"),
            ),
        }
    }
}

// ─── disk ───

/// `(free_bytes, total_bytes)` for the filesystem holding a path.
pub type DiskProbe = Arc<dyn Fn(&Path) -> Option<(u64, u64)> + Send + Sync>;

pub struct DiskCheck {
    probe: DiskProbe,
}

impl DiskCheck {
    pub fn new() -> Self {
        DiskCheck { probe: Arc::new(sysinfo_disk_probe) }
    }

    pub fn with_probe(probe: DiskProbe) -> Self {
        DiskCheck { probe }
    }
}

impl Default for DiskCheck {
    fn default() -> Self {
        Self::new()
    }
}

fn sysinfo_disk_probe(path: &Path) -> Option<(u64, u64)> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .or_else(|| disks.iter().next())
        .map(|disk| (disk.available_space(), disk.total_space()))
}

#[async_trait]
impl PreflightCheck for DiskCheck {
    fn name(&self) -> &'static str {
        "DISK_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P1
    }

    async fn execute(&self, config: &PreflightConfig) -> CheckResult {
        let Some((free, total)) = (self.probe)(&config.storage_path) else {
            return CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "Disk check failed: no filesystem information",
            );
        };
        if total == 0 {
            return CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "Disk check failed: zero-size filesystem",
            );
        }
        let percent_free = (free as f64 / total as f64) * 100.0;
        let details = json!({"free_percent": percent_free});
        if percent_free > 10.0 {
            CheckResult::new(
                self.name(),
                CheckStatus::Pass,
                self.priority(),
                format!("Disk space OK: {percent_free:.1}% free"),
            )
            .with_details(details)
        } else {
            CheckResult::new(
                self.name(),
                CheckStatus::Warn,
                self.priority(),
                format!("Low disk space: {percent_free:.1}% free (min 10%)"),
            )
            .with_details(details)
        }
    }
}

// ─── memory ───

/// Available RAM in bytes.
pub type MemoryProbe = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct MemoryCheck {
    probe: MemoryProbe,
}

impl MemoryCheck {
    pub fn new() -> Self {
        MemoryCheck {
            probe: Arc::new(|| {
                let mut system = sysinfo::System::new();
                system.refresh_memory();
                system.available_memory()
            }),
        }
    }

    pub fn with_probe(probe: MemoryProbe) -> Self {
        MemoryCheck { probe }
    }
}

impl Default for MemoryCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreflightCheck for MemoryCheck {
    fn name(&self) -> &'static str {
        "MEMORY_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P1
    }

    async fn execute(&self, _config: &PreflightConfig) -> CheckResult {
        let available_gb = (self.probe)() as f64 / (1024.0 * 1024.0 * 1024.0);
        let details = json!({"available_gb": available_gb});
        if available_gb > 1.0 {
            CheckResult::new(
                self.name(),
                CheckStatus::Pass,
                self.priority(),
                format!("Memory OK: {available_gb:.2}GB available"),
            )
            .with_details(details)
        } else {
            CheckResult::new(
                self.name(),
                CheckStatus::Warn,
                self.priority(),
                format!("Low memory: {available_gb:.2}GB available (min 1GB)"),
            )
            .with_details(details)
        }
    }
}

// ─── C2 certificate ───

/// notAfter instant of the certificate at a path.
pub type CertProbe = Arc<dyn Fn(&Path) -> Result<DateTime<Utc>, String> + Send + Sync>;

pub struct CertCheck {
    probe: CertProbe,
}

impl CertCheck {
    pub fn new() -> Self {
        CertCheck { probe: Arc::new(openssl_not_after) }
    }

    pub fn with_probe(probe: CertProbe) -> Self {
        CertCheck { probe }
    }
}

impl Default for CertCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Read notAfter via the openssl CLI (`x509 -enddate -noout`).
fn openssl_not_after(path: &Path) -> Result<DateTime<Utc>, String> {
    let output = std::process::Command::new("openssl")
        .args(["x509", "-enddate", "-noout", "-in"])
        .arg(path)
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let raw = stdout
        .trim()
        .strip_prefix("notAfter=")
        .ok_or_else(|| format!("unexpected openssl output: {}", stdout.trim()))?;
    // openssl prints e.g. "Mar  1 12:00:00 2027 GMT"
    chrono::NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y GMT")
        .map(|naive| naive.and_utc())
        .map_err(|e| e.to_string())
}

#[async_trait]
impl PreflightCheck for CertCheck {
    fn name(&self) -> &'static str {
        "CERT_CHECK"
    }

    fn priority(&self) -> CheckPriority {
        CheckPriority::P0
    }

    async fn execute(&self, config: &PreflightConfig) -> CheckResult {
        if !config.c2_enabled {
            return CheckResult::new(
                self.name(),
                CheckStatus::Pass,
                self.priority(),
                "C2 disabled - skipping cert check",
            );
        }
        let Some(path) = config.c2_cert_path.as_ref().filter(|p| p.exists()) else {
            return CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                "C2 cert missing",
            );
        };
        let not_after = match (self.probe)(path) {
            Ok(not_after) => not_after,
            Err(e) => {
                return CheckResult::new(
                    self.name(),
                    CheckStatus::Fail,
                    self.priority(),
                    format!("Cert check failed: {e}"),
                )
            }
        };
        let hours_remaining = (not_after - Utc::now()).num_hours();
        let details =
            json!({"expires_at": not_after.to_rfc3339(), "hours_remaining": hours_remaining});
        if hours_remaining < 0 {
            CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                format!("C2 cert expired at {}", not_after.to_rfc3339()),
            )
            .with_details(details)
        } else if hours_remaining < CERT_MIN_HOURS_REMAINING {
            CheckResult::new(
                self.name(),
                CheckStatus::Fail,
                self.priority(),
                format!(
                    "C2 cert expires in {hours_remaining}h (min {CERT_MIN_HOURS_REMAINING}h required)"
                ),
            )
            .with_details(details)
        } else {
            CheckResult::new(
                self.name(),
                CheckStatus::Pass,
                self.priority(),
                format!("C2 cert valid ({hours_remaining}h remaining)"),
            )
            .with_details(details)
        }
    }
}

// ─── runner ───

pub struct PreflightRunner {
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl PreflightRunner {
    pub fn new(checks: Vec<Box<dyn PreflightCheck>>) -> Self {
        PreflightRunner { checks }
    }

    /// The standard check set for a wired daemon.
    pub fn standard(broker: Arc<dyn Broker>, reasoner: Arc<dyn Reasoner>) -> Self {
        PreflightRunner::new(vec![
            Box::new(BrokerCheck::new(broker)),
            Box::new(ReasonerCheck::new(reasoner)),
            Box::new(ScopeCheck),
            Box::new(DiskCheck::new()),
            Box::new(MemoryCheck::new()),
            Box::new(CertCheck::new()),
        ])
    }

    /// Run every check, P0 before P1, sequentially.
    pub async fn run_all(&self, config: &PreflightConfig) -> Vec<CheckResult> {
        let mut ordered: Vec<&Box<dyn PreflightCheck>> = self.checks.iter().collect();
        ordered.sort_by_key(|check| check.priority());

        let mut results = Vec::with_capacity(ordered.len());
        for check in ordered {
            results.push(check.execute(config).await);
        }
        results
    }

    /// Raise on any P0 FAIL, and (unless warnings are accepted) on any P1
    /// FAIL or WARN.
    pub fn validate(
        &self,
        results: &[CheckResult],
        accept_warnings: bool,
    ) -> Result<(), PreflightError> {
        let blocking: Vec<CheckResult> = results
            .iter()
            .filter(|r| r.priority == CheckPriority::P0 && r.status == CheckStatus::Fail)
            .cloned()
            .collect();
        if !blocking.is_empty() {
            return Err(PreflightError::Blocking(blocking));
        }

        let warnings: Vec<CheckResult> = results
            .iter()
            .filter(|r| {
                r.priority == CheckPriority::P1
                    && matches!(r.status, CheckStatus::Fail | CheckStatus::Warn)
            })
            .cloned()
            .collect();
        if !warnings.is_empty() && !accept_warnings {
            return Err(PreflightError::Warnings(warnings));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "preflight_tests.rs"]
mod tests;

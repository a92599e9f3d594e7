// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accumulated attack intelligence for one engagement.
//!
//! The context is owned by the agent task that mutates it; other components
//! only ever see snapshots. No shared references.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::finding::Finding;
use crate::phase::PhaseResult;

/// Intelligence gathered across phases: hosts, ports, services, and the
/// loot lists (vulnerabilities, credentials, shells).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttackContext {
    pub target: String,
    pub discovered_hosts: BTreeSet<String>,
    /// host → open ports, in discovery order.
    pub open_ports: BTreeMap<String, Vec<u16>>,
    /// host → (port → service name).
    pub services: BTreeMap<String, BTreeMap<u16, String>>,
    pub vulnerabilities: Vec<Finding>,
    pub credentials: Vec<Finding>,
    pub shells: Vec<Finding>,
    pub phase_history: Vec<PhaseResult>,
}

impl AttackContext {
    pub fn new(target: impl Into<String>) -> Self {
        AttackContext { target: target.into(), ..Default::default() }
    }

    /// Record an open port and its service, marking the host as discovered.
    pub fn add_port(&mut self, host: &str, port: u16, service: &str) {
        self.discovered_hosts.insert(host.to_string());
        let ports = self.open_ports.entry(host.to_string()).or_default();
        if !ports.contains(&port) {
            ports.push(port);
        }
        self.services.entry(host.to_string()).or_default().insert(port, service.to_string());
    }

    pub fn add_host(&mut self, host: &str) {
        self.discovered_hosts.insert(host.to_string());
    }

    pub fn add_vulnerability(&mut self, finding: Finding) {
        self.vulnerabilities.push(finding);
    }

    pub fn add_credential(&mut self, finding: Finding) {
        self.credentials.push(finding);
    }

    pub fn add_shell(&mut self, finding: Finding) {
        self.shells.push(finding);
    }

    /// True if any discovered service name contains `needle` (case-insensitive).
    pub fn has_service_like(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.services
            .values()
            .flat_map(|ports| ports.values())
            .any(|service| service.to_lowercase().contains(&needle))
    }

    pub fn total_open_ports(&self) -> usize {
        self.open_ports.values().map(Vec::len).sum()
    }

    /// Compact view handed to the reasoner: counts only, no evidence bodies.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "target": self.target,
            "discovered_hosts": self.discovered_hosts.iter().collect::<Vec<_>>(),
            "open_ports": self.open_ports,
            "services": self.services,
            "vulnerabilities_count": self.vulnerabilities.len(),
            "credentials_count": self.credentials.len(),
            "shells_count": self.shells.len(),
        })
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

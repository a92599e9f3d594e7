// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Emergency sandbox teardown by engagement label.
//!
//! The reaper is synchronous on purpose: the halt path runs it on the
//! blocking thread pool so sandbox-API latency never stalls the scheduling
//! loop.

use std::process::Command;

use tracing::{debug, warn};

/// Per-sandbox results of a labelled stop sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub stopped: usize,
    pub killed: usize,
    pub failed: usize,
}

impl ReapOutcome {
    /// The sweep succeeded if nothing was left running.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Stops every sandbox labelled with an engagement id. Never panics; every
/// failure is converted into the outcome counts.
pub trait SandboxReaper: Send + Sync {
    fn stop_labeled(&self, engagement_id: &str) -> ReapOutcome;
}

/// Docker-CLI reaper: `docker ps` by label, then stop-else-kill each.
pub struct DockerReaper {
    binary: String,
}

impl DockerReaper {
    pub fn new() -> Self {
        DockerReaper { binary: "docker".to_string() }
    }
}

impl Default for DockerReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxReaper for DockerReaper {
    fn stop_labeled(&self, engagement_id: &str) -> ReapOutcome {
        let mut outcome = ReapOutcome::default();
        let list = Command::new(&self.binary)
            .args(["ps", "-q", "--filter", &format!("label=opfor.engagement={engagement_id}")])
            .output();
        let ids = match list {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Ok(output) => {
                warn!(
                    engagement_id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "sandbox list failed during halt"
                );
                outcome.failed += 1;
                return outcome;
            }
            Err(e) => {
                warn!(engagement_id, error = %e, "sandbox list failed during halt");
                outcome.failed += 1;
                return outcome;
            }
        };

        for id in ids {
            let stop =
                Command::new(&self.binary).args(["stop", "-t", "0", &id]).output();
            if matches!(&stop, Ok(o) if o.status.success()) {
                outcome.stopped += 1;
                continue;
            }
            let kill = Command::new(&self.binary).args(["kill", &id]).output();
            match kill {
                Ok(o) if o.status.success() => outcome.killed += 1,
                Ok(o) if String::from_utf8_lossy(&o.stderr).contains("No such container") => {
                    // Already gone counts as stopped.
                    debug!(container = %id, "sandbox already gone during halt");
                    outcome.stopped += 1;
                }
                _ => {
                    warn!(container = %id, "failed to stop sandbox during halt");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

/// Test reaper with scripted latency and failure.
pub struct FakeReaper {
    pub outcome: ReapOutcome,
    pub delay: std::time::Duration,
    pub calls: parking_lot::Mutex<Vec<String>>,
}

impl FakeReaper {
    pub fn new(outcome: ReapOutcome) -> Self {
        FakeReaper {
            outcome,
            delay: std::time::Duration::ZERO,
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl SandboxReaper for FakeReaper {
    fn stop_labeled(&self, engagement_id: &str) -> ReapOutcome {
        self.calls.lock().push(engagement_id.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.outcome.clone()
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;

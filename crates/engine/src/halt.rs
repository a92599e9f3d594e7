// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tri-path emergency halt.
//!
//! `trigger` sets the process-visible frozen flag synchronously before
//! anything else runs, then fires three best-effort halt paths in parallel,
//! each under its own deadline: a kill broadcast on the control channel, a
//! process-group SIGTERM, and a labelled sandbox sweep on the blocking
//! pool. Nothing raised inside a path escapes `trigger`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use opfor_bus::EventBus;
use opfor_core::HaltTriggered;
use opfor_sandbox::SandboxReaper;

/// Per-path budgets.
const BROADCAST_BUDGET: Duration = Duration::from_millis(500);
const SIGNAL_BUDGET: Duration = Duration::from_millis(300);
const SANDBOX_BUDGET: Duration = Duration::from_millis(600);

/// Injectable signal sender so tests never SIGTERM the test runner.
pub type SignalFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Per-path outcomes; informational, `success` is carried separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HaltPaths {
    pub broadcast: bool,
    pub signal: bool,
    pub sandbox: bool,
}

/// Result of one `trigger` call. `success` reflects that the frozen flag
/// was set; the paths are best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct HaltOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub paths: HaltPaths,
}

pub struct HaltSwitch {
    engagement_id: String,
    frozen: AtomicBool,
    bus: Option<EventBus>,
    reaper: Option<Arc<dyn SandboxReaper>>,
    signal_fn: SignalFn,
}

fn process_group_sigterm() -> Result<(), String> {
    use nix::sys::signal::{killpg, Signal};
    match killpg(nix::unistd::getpgrp(), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        // Process group already gone still counts as delivered.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

impl HaltSwitch {
    pub fn new(engagement_id: impl Into<String>) -> Self {
        HaltSwitch {
            engagement_id: engagement_id.into(),
            frozen: AtomicBool::new(false),
            bus: None,
            reaper: None,
            signal_fn: Arc::new(process_group_sigterm),
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_reaper(mut self, reaper: Arc<dyn SandboxReaper>) -> Self {
        self.reaper = Some(reaper);
        self
    }

    pub fn with_signal_fn(mut self, signal_fn: SignalFn) -> Self {
        self.signal_fn = signal_fn;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Called by agents before each step. Fails once the flag is set.
    pub fn check_frozen(&self, who: &str) -> Result<(), HaltTriggered> {
        if self.is_frozen() {
            return Err(HaltTriggered {
                engagement_id: self.engagement_id.clone(),
                triggered_by: who.to_string(),
                reason: "engagement frozen".to_string(),
            });
        }
        Ok(())
    }

    /// Halt everything. Sets the frozen flag first, then runs the three
    /// paths concurrently under their individual budgets.
    pub async fn trigger(&self, reason: &str, who: &str) -> HaltOutcome {
        // The flag must be visible before any path runs.
        self.frozen.store(true, Ordering::SeqCst);
        let started = Instant::now();
        warn!(
            engagement_id = %self.engagement_id,
            reason,
            triggered_by = who,
            "emergency halt triggered"
        );

        let (broadcast, signal, sandbox) = tokio::join!(
            tokio::time::timeout(BROADCAST_BUDGET, self.path_broadcast(reason, who)),
            tokio::time::timeout(SIGNAL_BUDGET, self.path_signal()),
            tokio::time::timeout(SANDBOX_BUDGET, self.path_sandbox()),
        );

        let paths = HaltPaths {
            broadcast: broadcast.unwrap_or(false),
            signal: signal.unwrap_or(false),
            sandbox: sandbox.unwrap_or(false),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        warn!(duration_ms, ?paths, "emergency halt completed");

        HaltOutcome { success: true, duration_ms, paths }
    }

    /// Path 1: kill message on the control channel.
    async fn path_broadcast(&self, reason: &str, who: &str) -> bool {
        let Some(bus) = &self.bus else {
            debug!("halt broadcast path skipped: no bus");
            return false;
        };
        let message = json!({
            "command": "kill",
            "issued_by": who,
            "timestamp": Utc::now().to_rfc3339(),
            "reason": reason,
            "engagement_id": self.engagement_id,
        });
        match bus.publish("control:kill", message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "halt broadcast path failed");
                false
            }
        }
    }

    /// Path 2: process-group termination signal.
    async fn path_signal(&self) -> bool {
        match (self.signal_fn)() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "halt signal path failed");
                false
            }
        }
    }

    /// Path 3: stop every sandbox labelled with the engagement, off the
    /// scheduling loop.
    async fn path_sandbox(&self) -> bool {
        let Some(reaper) = &self.reaper else {
            debug!("halt sandbox path skipped: no reaper");
            return false;
        };
        let reaper = Arc::clone(reaper);
        let engagement_id = self.engagement_id.clone();
        match tokio::task::spawn_blocking(move || reaper.stop_labeled(&engagement_id)).await {
            Ok(outcome) => outcome.is_success(),
            Err(e) => {
                warn!(error = %e, "halt sandbox path crashed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "halt_tests.rs"]
mod tests;

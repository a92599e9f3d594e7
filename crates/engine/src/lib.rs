// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OPFOR attack engine.
//!
//! The orchestrator fans tool invocations out over the sandbox pool, the
//! kill chain drives phase progression from findings, the attack agent is
//! the reasoner-directed inner loop, and the halt switch guarantees the
//! whole fleet stops inside its wall-clock budget.

mod agent;
mod halt;
mod killchain;
mod orchestrator;

pub use agent::{sanitize_target, AttackAgent, AttackAgentConfig, EngageReport};
pub use halt::{HaltOutcome, HaltPaths, HaltSwitch, SignalFn};
pub use killchain::KillChain;
pub use orchestrator::ToolOrchestrator;

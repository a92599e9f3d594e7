// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Isolated execution environments for security tools.
//!
//! Two runtimes: a fixture replayer for tests and development, and a
//! Docker-CLI runtime for production (no network namespace, minimum
//! capability set for raw-packet tools). The pool keeps N warm sandboxes
//! with FIFO acquisition and asynchronous replacement of unhealthy ones.

mod fixtures;
mod pool;
mod reaper;
mod runtime;

pub use fixtures::FixtureStore;
pub use pool::{PoolError, SandboxHandle, SandboxPool};
pub use reaper::{DockerReaper, FakeReaper, ReapOutcome, SandboxReaper};
pub use runtime::{
    DockerFactory, DockerSandbox, MockSandbox, Sandbox, SandboxError, SandboxFactory,
};

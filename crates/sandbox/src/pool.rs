// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warm pool of sandboxes with FIFO acquisition.
//!
//! Mock mode hands out a fresh fixture replayer per acquire and never
//! blocks. Real mode pre-warms `N` sandboxes; acquisitions are FIFO on the
//! free queue, and an unhealthy sandbox returned to the pool is destroyed
//! and replaced asynchronously without the caller waiting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{info, warn};

use opfor_core::ToolResult;

use crate::fixtures::FixtureStore;
use crate::runtime::{MockSandbox, Sandbox, SandboxError, SandboxFactory};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Sandbox pool exhausted: no free sandbox within {waited_ms}ms")]
    Exhausted { waited_ms: u64 },

    #[error(transparent)]
    Create(#[from] SandboxError),
}

/// A checked-out sandbox. Return it with [`SandboxPool::release`].
pub struct SandboxHandle {
    pub sandbox: Arc<dyn Sandbox>,
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle").finish_non_exhaustive()
    }
}

enum Mode {
    Mock { fixtures: Arc<FixtureStore>, latency: Duration },
    Real { factory: Arc<dyn SandboxFactory>, size: usize },
}

struct PoolInner {
    mode: Mode,
    free: Mutex<VecDeque<Arc<dyn Sandbox>>>,
    tracked: Mutex<Vec<Arc<dyn Sandbox>>>,
    freed: Notify,
    in_use: AtomicUsize,
    mock_seq: AtomicU64,
}

#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

impl SandboxPool {
    /// Fixture-replaying pool for tests and development.
    pub fn mock(fixtures: Arc<FixtureStore>) -> Self {
        Self::mock_with_latency(fixtures, Duration::ZERO)
    }

    pub fn mock_with_latency(fixtures: Arc<FixtureStore>, latency: Duration) -> Self {
        SandboxPool {
            inner: Arc::new(PoolInner {
                mode: Mode::Mock { fixtures, latency },
                free: Mutex::new(VecDeque::new()),
                tracked: Mutex::new(Vec::new()),
                freed: Notify::new(),
                in_use: AtomicUsize::new(0),
                mock_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Real pool of `size` sandboxes created by `factory`.
    pub fn real(factory: Arc<dyn SandboxFactory>, size: usize) -> Self {
        SandboxPool {
            inner: Arc::new(PoolInner {
                mode: Mode::Real { factory, size },
                free: Mutex::new(VecDeque::new()),
                tracked: Mutex::new(Vec::new()),
                freed: Notify::new(),
                in_use: AtomicUsize::new(0),
                mock_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Pre-warm the pool. Mock mode is a no-op; real mode creates all
    /// sandboxes in parallel and fails if any cannot start.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let Mode::Real { factory, size } = &self.inner.mode else {
            return Ok(());
        };
        let mut tasks: JoinSet<Result<Arc<dyn Sandbox>, SandboxError>> = JoinSet::new();
        for _ in 0..*size {
            let factory = Arc::clone(factory);
            tasks.spawn(async move { factory.create().await });
        }
        while let Some(joined) = tasks.join_next().await {
            let sandbox = joined
                .map_err(|e| SandboxError::Spawn(e.to_string()))?
                .map_err(PoolError::Create)?;
            self.inner.tracked.lock().push(Arc::clone(&sandbox));
            self.inner.free.lock().push_back(sandbox);
            self.inner.freed.notify_one();
        }
        info!(size, "sandbox pool warmed");
        Ok(())
    }

    /// Stop every tracked sandbox in parallel, including ones still queued.
    pub async fn shutdown(&self) {
        let tracked: Vec<Arc<dyn Sandbox>> = {
            let mut tracked = self.inner.tracked.lock();
            self.inner.free.lock().clear();
            tracked.drain(..).collect()
        };
        let mut tasks = JoinSet::new();
        for sandbox in tracked {
            tasks.spawn(async move { sandbox.stop().await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Take a sandbox, FIFO. In mock mode this always returns immediately.
    pub async fn acquire(&self, timeout: Duration) -> Result<SandboxHandle, PoolError> {
        match &self.inner.mode {
            Mode::Mock { fixtures, latency } => {
                let seq = self.inner.mock_seq.fetch_add(1, Ordering::SeqCst);
                self.inner.in_use.fetch_add(1, Ordering::SeqCst);
                Ok(SandboxHandle {
                    sandbox: Arc::new(MockSandbox::new(
                        format!("mock-{seq}"),
                        Arc::clone(fixtures),
                        *latency,
                    )),
                })
            }
            Mode::Real { .. } => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(sandbox) = self.inner.free.lock().pop_front() {
                        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
                        return Ok(SandboxHandle { sandbox });
                    }
                    let Some(remaining) = deadline.checked_duration_since(Instant::now())
                    else {
                        return Err(PoolError::Exhausted {
                            waited_ms: timeout.as_millis() as u64,
                        });
                    };
                    let _ = tokio::time::timeout(remaining, self.inner.freed.notified()).await;
                }
            }
        }
    }

    /// Return a sandbox. An unhealthy one is destroyed and replaced in the
    /// background; the caller does not wait.
    pub async fn release(&self, handle: SandboxHandle) {
        self.inner.in_use.fetch_sub(1, Ordering::SeqCst);
        let Mode::Real { factory, .. } = &self.inner.mode else {
            return;
        };
        if handle.sandbox.is_healthy().await {
            self.inner.free.lock().push_back(handle.sandbox);
            self.inner.freed.notify_one();
            return;
        }

        warn!(sandbox = %handle.sandbox.id(), "unhealthy sandbox discarded, spawning replacement");
        self.inner.tracked.lock().retain(|s| s.id() != handle.sandbox.id());
        let factory = Arc::clone(factory);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            handle.sandbox.stop().await;
            match factory.create().await {
                Ok(replacement) => {
                    inner.tracked.lock().push(Arc::clone(&replacement));
                    inner.free.lock().push_back(replacement);
                    inner.freed.notify_one();
                    info!("sandbox replacement spawned");
                }
                Err(e) => warn!(error = %e, "sandbox replacement failed"),
            }
        });
    }

    /// Run one command in the sandbox. Never errors; all failures are
    /// encoded in the result.
    pub async fn execute(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ToolResult {
        handle.sandbox.execute(command, timeout).await
    }

    /// Fraction of the pool currently in use (0.0 – 1.0).
    pub fn pressure(&self) -> f64 {
        match &self.inner.mode {
            Mode::Mock { .. } => 0.0,
            Mode::Real { size, .. } => {
                if *size == 0 {
                    return 1.0;
                }
                self.inner.in_use.load(Ordering::SeqCst) as f64 / *size as f64
            }
        }
    }

    pub fn available_count(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and component wiring.

use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use opfor_adapters::builtin_adapters;
use opfor_bus::{EventBus, MemoryBroker};
use opfor_core::KeyStore;
use opfor_sandbox::{DockerFactory, DockerReaper, FixtureStore, SandboxPool, SandboxReaper};
use opfor_storage::CheckpointStore;

use crate::listener::ListenCtx;
use crate::planner::OfflinePlanner;
use crate::preflight::PreflightRunner;
use crate::sessions::{SessionDeps, SessionManager, SessionManagerConfig};

use super::{Config, LifecycleError};

pub struct StartupResult {
    pub listener: UnixListener,
    pub ctx: Arc<ListenCtx>,
    pub pool: SandboxPool,
    /// Held for the daemon's lifetime; dropping releases the lock.
    pub _lock: std::fs::File,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon: lock, stale-socket cleanup, bind, wire the graph.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Leave the files alone if another daemon owns them.
            if !matches!(
                e,
                LifecycleError::LockFailed(_) | LifecycleError::AlreadyRunning(_)
            ) {
                super::cleanup(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.base_dir)?;

    // Lock first so two daemons can never race past this point. Avoid
    // truncating before the lock is held — the pid belongs to the winner.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(config.pid_path())?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // A leftover socket file from a crashed daemon is detected by
    // test-connecting: a live daemon answers, a dead one refuses.
    let socket_path = config.socket_path();
    if socket_path.exists() {
        match UnixStream::connect(&socket_path).await {
            Ok(_) => return Err(LifecycleError::AlreadyRunning(socket_path)),
            Err(_) => {
                warn!(path = %socket_path.display(), "removing stale socket file");
                std::fs::remove_file(&socket_path)?;
            }
        }
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| LifecycleError::BindFailed(socket_path.clone(), e))?;

    // Wire the component graph once.
    let broker = MemoryBroker::new();
    let bus = EventBus::new(broker.clone());

    let (pool, reaper): (SandboxPool, Option<Arc<dyn SandboxReaper>>) =
        if config.real_sandboxes {
            let factory = Arc::new(DockerFactory::new("shared"));
            (SandboxPool::real(factory, config.pool_size), Some(Arc::new(DockerReaper::new())))
        } else {
            let fixtures = match &config.fixtures_dir {
                Some(dir) => Arc::new(FixtureStore::from_dir(dir)),
                None => Arc::new(FixtureStore::empty()),
            };
            (SandboxPool::mock(fixtures), None)
        };
    if let Err(e) = pool.initialize().await {
        warn!(error = %e, "sandbox pool pre-warm failed, continuing degraded");
    }

    let reasoner = Arc::new(OfflinePlanner);
    let manager = SessionManager::new(
        SessionManagerConfig {
            base_dir: config.base_dir.clone(),
            max_active: config.max_active,
            agent: config.agent.clone(),
        },
        SessionDeps {
            bus: bus.clone(),
            pool: pool.clone(),
            reasoner: reasoner.clone(),
            adapters: builtin_adapters(&pool),
            checkpoints: CheckpointStore::new(&config.base_dir),
            keys: KeyStore::new(&config.base_dir),
            preflight: PreflightRunner::standard(broker, reasoner),
            reaper,
        },
    );

    let ctx = Arc::new(ListenCtx {
        manager,
        shutdown: Arc::new(Notify::new()),
        drain_timeout: config.drain_timeout,
        heartbeat_interval: config.heartbeat_interval,
        exit_code: Mutex::new(0),
    });

    info!("daemon started");
    Ok(StartupResult { listener, ctx, pool, _lock: lock_file })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup, wiring, and shutdown.
//!
//! Startup acquires the lock file first, detects and removes stale socket
//! files by test-connecting, binds the control socket, wires the component
//! graph once, and hands the listener the shared context. Clean exit
//! removes the socket and pid files and returns exit code 0; a forced or
//! failed shutdown returns 1.

mod startup;

pub use startup::{startup, StartupResult};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use opfor_engine::AttackAgentConfig;

use crate::env;
use crate::listener::Listener;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon already running (socket at {0} is live)")]
    AlreadyRunning(PathBuf),

    #[error("failed to acquire daemon lock: {0}")]
    LockFailed(std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("no state directory available")]
    NoStateDir,
}

/// Daemon configuration, resolved before startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub max_active: usize,
    pub pool_size: usize,
    /// Mock sandboxes replay fixtures from this directory when set.
    pub fixtures_dir: Option<PathBuf>,
    /// Real mode drives Docker; default is the mock fixture replayer.
    pub real_sandboxes: bool,
    pub drain_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub agent: AttackAgentConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, LifecycleError> {
        let base_dir = env::state_dir().ok_or(LifecycleError::NoStateDir)?;
        Ok(Config {
            base_dir,
            max_active: env::max_active(),
            pool_size: 4,
            fixtures_dir: std::env::var("OPFOR_FIXTURES_DIR").ok().map(PathBuf::from),
            real_sandboxes: std::env::var("OPFOR_REAL_SANDBOXES").is_ok(),
            drain_timeout: env::drain_timeout(),
            heartbeat_interval: env::heartbeat_interval(),
            agent: AttackAgentConfig::default(),
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.base_dir.join("daemon.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base_dir.join("daemon.pid")
    }
}

/// Run the daemon to completion. Returns the process exit code.
pub async fn run(config: Config) -> i32 {
    let started = match startup(&config).await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "daemon startup failed");
            return 1;
        }
    };
    let StartupResult { listener, ctx, pool, _lock } = started;

    info!(socket = %config.socket_path().display(), "daemon ready");
    let shutdown = Arc::clone(&ctx.shutdown);
    tokio::select! {
        _ = Listener::new(listener, Arc::clone(&ctx)).run() => {}
        _ = shutdown.notified() => {
            info!("shutdown requested");
        }
    }

    pool.shutdown().await;
    cleanup(&config);
    let code = *ctx.exit_code.lock();
    info!(code, "daemon exiting");
    code
}

/// Remove socket and pid files on exit.
fn cleanup(config: &Config) {
    let _ = std::fs::remove_file(config.socket_path());
    let _ = std::fs::remove_file(config.pid_path());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: OPFOR_STATE_DIR > XDG_STATE_HOME/opfor >
/// ~/.local/state/opfor
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("OPFOR_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("opfor"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/opfor"))
}

fn duration_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Default IPC timeout for single reads/writes on the control socket.
pub fn ipc_timeout() -> Duration {
    duration_var("OPFOR_IPC_TIMEOUT_MS", Duration::from_secs(5))
}

/// Shutdown drain timeout (default 5s, via `OPFOR_DRAIN_TIMEOUT_MS`).
pub fn drain_timeout() -> Duration {
    duration_var("OPFOR_DRAIN_TIMEOUT_MS", Duration::from_secs(5))
}

/// Interval between heartbeat stream events to attached clients.
pub fn heartbeat_interval() -> Duration {
    duration_var("OPFOR_HEARTBEAT_MS", Duration::from_secs(10))
}

/// Maximum concurrently active engagements.
pub fn max_active() -> usize {
    std::env::var("OPFOR_MAX_ACTIVE").ok().and_then(|s| s.parse().ok()).unwrap_or(10)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox runtimes: mock fixture replayer and Docker CLI.
//!
//! The Docker runtime drives the `docker` CLI rather than the daemon
//! socket, which works in restricted environments where the socket is not
//! mounted. Containers run with no network namespace and only the
//! capabilities raw-packet tools need.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

use opfor_core::{ToolErrorClass, ToolResult};

use crate::fixtures::FixtureStore;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn sandbox: {0}")]
    Spawn(String),

    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),
}

/// One isolated execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Run one command string, encoding every failure into the result.
    async fn execute(&self, command: &str, timeout: Duration) -> ToolResult;

    async fn stop(&self);

    async fn is_healthy(&self) -> bool;
}

/// Creates started sandboxes for the pool.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

/// Tool name from a command string: basename of the first token.
pub(crate) fn detect_tool(command: &str) -> Option<&str> {
    let first = command.split_whitespace().next()?;
    Some(first.rsplit('/').next().unwrap_or(first))
}

// ─── mock runtime ───

/// Fixture replayer. Always healthy, executes instantly (plus an optional
/// injected latency for load tests).
pub struct MockSandbox {
    id: String,
    fixtures: Arc<FixtureStore>,
    latency: Duration,
}

impl MockSandbox {
    pub fn new(id: impl Into<String>, fixtures: Arc<FixtureStore>, latency: Duration) -> Self {
        MockSandbox { id: id.into(), fixtures, latency }
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, command: &str, _timeout: Duration) -> ToolResult {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let Some(tool) = detect_tool(command) else {
            return ToolResult::failed(
                "unknown",
                ToolErrorClass::ExecutionException,
                "could not detect tool from command",
                0,
            );
        };
        ToolResult::ok(tool, self.fixtures.load(tool), self.latency.as_millis() as u64)
    }

    async fn stop(&self) {}

    async fn is_healthy(&self) -> bool {
        true
    }
}

// ─── docker runtime ───

const DEFAULT_IMAGE: &str = "kalilinux/kali-rolling";
const LABEL_KEY: &str = "opfor.engagement";

/// Factory for long-lived Docker sandboxes labelled with the engagement id.
pub struct DockerFactory {
    binary: String,
    image: String,
    engagement_id: String,
}

impl DockerFactory {
    pub fn new(engagement_id: impl Into<String>) -> Self {
        DockerFactory {
            binary: "docker".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            engagement_id: engagement_id.into(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Argument list for `docker run`, exposed so tests can inspect the
    /// isolation flags without a live Docker daemon.
    pub fn build_run_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--network=none".to_string(),
            "--cap-drop=ALL".to_string(),
            "--cap-add=NET_ADMIN".to_string(),
            "--cap-add=NET_RAW".to_string(),
            "--label".to_string(),
            format!("{LABEL_KEY}={}", self.engagement_id),
            self.image.clone(),
            "sleep".to_string(),
            "infinity".to_string(),
        ]
    }
}

#[async_trait]
impl SandboxFactory for DockerFactory {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let output = Command::new(&self.binary)
            .args(self.build_run_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(SandboxError::Spawn(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Arc::new(DockerSandbox { binary: self.binary.clone(), container_id }))
    }
}

/// A running container driven through `docker exec`.
pub struct DockerSandbox {
    binary: String,
    container_id: String,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.container_id
    }

    async fn execute(&self, command: &str, timeout: Duration) -> ToolResult {
        let tool = detect_tool(command).unwrap_or("unknown").to_string();
        let start = Instant::now();
        let run = Command::new(&self.binary)
            .args(["exec", &self.container_id, "sh", "-c", command])
            .stdin(Stdio::null())
            .output();

        let output = match tokio::time::timeout(timeout, run).await {
            Err(_) => {
                warn!(container = %opfor_core::id::short(&self.container_id, 12), %tool, "sandbox execute timed out");
                return ToolResult::failed(
                    tool,
                    ToolErrorClass::Timeout,
                    format!("execution timed out after {}s", timeout.as_secs()),
                    start.elapsed().as_millis() as u64,
                );
            }
            Ok(Err(e)) => {
                return ToolResult::failed(
                    tool,
                    ToolErrorClass::ExecutionException,
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                );
            }
            Ok(Ok(output)) => output,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code == 0 {
            let mut result = ToolResult::ok(tool, stdout, duration_ms);
            result.stderr = stderr;
            return result;
        }

        // `docker exec` against a dead container reports "No such container".
        let class = if stderr.contains("No such container") {
            ToolErrorClass::SandboxCrashed
        } else {
            ToolErrorClass::NonZeroExit
        };
        let mut result = ToolResult::failed(tool, class, stderr, duration_ms);
        result.stdout = stdout;
        result.exit_code = exit_code;
        result
    }

    async fn stop(&self) {
        let stopped = Command::new(&self.binary)
            .args(["stop", "-t", "1", &self.container_id])
            .output()
            .await;
        if !matches!(&stopped, Ok(o) if o.status.success()) {
            let _ = Command::new(&self.binary).args(["kill", &self.container_id]).output().await;
        }
    }

    async fn is_healthy(&self) -> bool {
        let output = Command::new(&self.binary)
            .args(["inspect", "-f", "{{.State.Running}}", &self.container_id])
            .output()
            .await;
        matches!(output, Ok(o) if o.status.success()
            && String::from_utf8_lossy(&o.stdout).trim() == "true")
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session manager: owns the set of live engagements.
//!
//! One agent task per running engagement; one bus-forwarder subscription
//! per engagement fanning events out to attached clients. The manager
//! never reaches into an agent's state — it learns everything from the
//! events the agent publishes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use opfor_adapters::{Reasoner, ToolAdapter};
use opfor_bus::{target_hash, AuditStream, EventBus};
use opfor_core::{AgentId, EngagementId, Finding, KeyStore, SubscriptionId};
use opfor_engine::{AttackAgent, AttackAgentConfig, HaltOutcome, HaltSwitch, ToolOrchestrator};
use opfor_sandbox::{SandboxPool, SandboxReaper};
use opfor_storage::{AgentSnapshot, CheckpointError, CheckpointStore};

use crate::preflight::{PreflightConfig, PreflightError, PreflightRunner};
use crate::protocol::{StreamEvent, StreamEventType};
use crate::sessions::machine::{
    EngagementState, EngagementStateMachine, InvalidStateTransition,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Engagement not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidStateTransition),

    #[error("Maximum active engagements reached ({0})")]
    ResourceLimit(usize),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid engagement configuration: {0}")]
    BadConfig(String),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Operator-supplied engagement configuration (validated YAML).
#[derive(Debug, Clone, Deserialize)]
pub struct EngagementConfig {
    pub target: String,
    #[serde(default)]
    pub scope: Option<PathBuf>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub c2_enabled: bool,
    #[serde(default)]
    pub c2_cert: Option<PathBuf>,
}

#[derive(Clone)]
pub struct SessionManagerConfig {
    pub base_dir: PathBuf,
    pub max_active: usize,
    pub agent: AttackAgentConfig,
}

pub struct SessionDeps {
    pub bus: EventBus,
    pub pool: SandboxPool,
    pub reasoner: Arc<dyn Reasoner>,
    pub adapters: Vec<Arc<dyn ToolAdapter>>,
    pub checkpoints: CheckpointStore,
    pub keys: KeyStore,
    pub preflight: PreflightRunner,
    pub reaper: Option<Arc<dyn SandboxReaper>>,
}

/// Compact engagement view for `sessions.list` and `get`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub engagement_id: String,
    pub state: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub agents: usize,
    pub findings: usize,
}

struct EngagementInner {
    subscriptions: HashMap<SubscriptionId, mpsc::UnboundedSender<StreamEvent>>,
    findings: Vec<Finding>,
    agent_ids: Vec<AgentId>,
    active: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<()>>,
    bus_token: Option<u64>,
}

struct Engagement {
    id: EngagementId,
    config_path: PathBuf,
    config: EngagementConfig,
    machine: Arc<EngagementStateMachine>,
    halt: Arc<HaltSwitch>,
    audit: Arc<AuditStream>,
    created_at: DateTime<Utc>,
    inner: Mutex<EngagementInner>,
}

impl Engagement {
    fn scope_path(&self) -> Option<PathBuf> {
        let scope = self.config.scope.as_ref()?;
        if scope.is_absolute() {
            return Some(scope.clone());
        }
        Some(self.config_path.parent().unwrap_or(Path::new(".")).join(scope))
    }

    /// Deliver one event to every attached subscriber, dropping closed
    /// streams.
    fn fan_out(&self, event: &StreamEvent) {
        let mut inner = self.inner.lock();
        inner.subscriptions.retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    fn summary(&self) -> SessionSummary {
        let inner = self.inner.lock();
        SessionSummary {
            engagement_id: self.id.as_str().to_string(),
            state: self.machine.current_state().to_string(),
            target: self.config.target.clone(),
            created_at: self.created_at,
            agents: inner.agent_ids.len(),
            findings: inner.findings.len(),
        }
    }
}

pub struct SessionManager {
    config: SessionManagerConfig,
    deps: SessionDeps,
    engagements: Mutex<HashMap<String, Arc<Engagement>>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, deps: SessionDeps) -> Arc<Self> {
        Arc::new(SessionManager { config, deps, engagements: Mutex::new(HashMap::new()) })
    }

    fn entry(&self, engagement_id: &str) -> Result<Arc<Engagement>, SessionError> {
        self.engagements
            .lock()
            .get(engagement_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(engagement_id.to_string()))
    }

    /// Allocate an engagement from a configuration file. Enforces the
    /// active-engagement limit.
    pub fn create(&self, config_path: &Path) -> Result<EngagementId, SessionError> {
        if !config_path.exists() {
            return Err(SessionError::ConfigNotFound(config_path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(config_path)
            .map_err(|e| SessionError::BadConfig(e.to_string()))?;
        let config: EngagementConfig =
            serde_yaml::from_str(&raw).map_err(|e| SessionError::BadConfig(e.to_string()))?;
        if config.target.trim().is_empty() {
            return Err(SessionError::BadConfig("target must not be empty".to_string()));
        }

        let mut engagements = self.engagements.lock();
        let active = engagements
            .values()
            .filter(|e| e.machine.current_state() != EngagementState::Completed)
            .count();
        if active >= self.config.max_active {
            return Err(SessionError::ResourceLimit(self.config.max_active));
        }

        let id = EngagementId::new();
        let mut halt = HaltSwitch::new(id.as_str()).with_bus(self.deps.bus.clone());
        if let Some(reaper) = &self.deps.reaper {
            halt = halt.with_reaper(Arc::clone(reaper));
        }
        let audit_key = self
            .deps
            .keys
            .load_or_create(id.as_str())
            .map_err(|e| SessionError::BadConfig(format!("key store: {e}")))?;
        let audit =
            Arc::new(AuditStream::new(self.deps.bus.broker(), id.as_str(), audit_key.to_vec()));
        let engagement = Arc::new(Engagement {
            id: id.clone(),
            config_path: config_path.to_path_buf(),
            config,
            machine: Arc::new(EngagementStateMachine::new(id.as_str())),
            halt: Arc::new(halt),
            audit,
            created_at: Utc::now(),
            inner: Mutex::new(EngagementInner {
                subscriptions: HashMap::new(),
                findings: Vec::new(),
                agent_ids: Vec::new(),
                active: None,
                task: None,
                bus_token: None,
            }),
        });

        // State transitions fan out to subscribers as stream events.
        let weak: Weak<Engagement> = Arc::downgrade(&engagement);
        engagement.machine.observe(move |from, to| {
            if let Some(engagement) = weak.upgrade() {
                engagement.fan_out(&StreamEvent::new(
                    StreamEventType::StateChange,
                    json!({"from": from.as_str(), "state": to.as_str()}),
                ));
            }
        });

        audit_event(&engagement, json!({"event": "engagement_created", "target": engagement.config.target}));
        engagements.insert(id.as_str().to_string(), engagement);
        info!(engagement_id = %id, "engagement created");
        Ok(id)
    }

    /// Run preflight, then INITIALIZING → RUNNING and spawn the agent.
    pub async fn start(
        &self,
        engagement_id: &str,
        accept_warnings: bool,
    ) -> Result<(), SessionError> {
        let engagement = self.entry(engagement_id)?;

        let preflight_config = PreflightConfig {
            scope_path: engagement.scope_path(),
            storage_path: self.config.base_dir.clone(),
            c2_enabled: engagement.config.c2_enabled,
            c2_cert_path: engagement.config.c2_cert.clone(),
        };
        let results = self.deps.preflight.run_all(&preflight_config).await;
        self.deps.preflight.validate(&results, accept_warnings)?;

        engagement.machine.start()?;
        audit_event(&engagement, json!({"event": "engagement_started"}));
        self.spawn_agent(&engagement).await;
        Ok(())
    }

    /// Wire the per-engagement bus forwarder and launch the agent task.
    async fn spawn_agent(&self, engagement: &Arc<Engagement>) {
        let agent_id = AgentId::new();
        let orchestrator = ToolOrchestrator::new(
            self.deps.pool.clone(),
            self.deps.bus.clone(),
            self.deps.adapters.clone(),
        );

        let mut agent_config = self.config.agent.clone();
        if let Some(max) = engagement.config.max_iterations {
            agent_config.max_iterations = max;
        }
        let agent = AttackAgent::new(
            agent_id.clone(),
            Arc::clone(&self.deps.reasoner),
            orchestrator,
            self.deps.bus.clone(),
            Arc::clone(&engagement.halt),
        )
        .with_config(agent_config);
        let active = agent.active_flag();

        // One ordered forwarder per engagement: agent status, findings for
        // this target, and this agent's log lines.
        let sanitized = opfor_engine::sanitize_target(&engagement.config.target);
        let patterns = vec![
            format!("agents:{}:status", agent_id.as_str()),
            format!("findings:{}:*", target_hash(&sanitized)),
            "swarm:log".to_string(),
        ];
        let weak: Weak<Engagement> = Arc::downgrade(engagement);
        let forwarder_agent = agent_id.as_str().to_string();
        let token = self
            .deps
            .bus
            .subscribe_many(&patterns, move |channel, payload| {
                let weak = weak.clone();
                let forwarder_agent = forwarder_agent.clone();
                async move {
                    let Some(engagement) = weak.upgrade() else {
                        return Ok(());
                    };
                    forward_bus_event(&engagement, &forwarder_agent, &channel, &payload);
                    Ok(())
                }
            })
            .await;

        let target = engagement.config.target.clone();
        let engagement_id = engagement.id.as_str().to_string();
        let task = tokio::spawn(async move {
            let report = agent.engage(&target).await;
            info!(
                engagement_id,
                iterations = report.iterations,
                findings = report.findings.len(),
                completed = report.completed,
                "agent loop finished"
            );
        });

        let mut inner = engagement.inner.lock();
        inner.agent_ids.push(agent_id);
        inner.active = Some(active);
        inner.task = Some(task);
        match token {
            Ok(token) => {
                // Replace any forwarder left over from a previous run.
                if let Some(old) = inner.bus_token.replace(token) {
                    let bus = self.deps.bus.clone();
                    tokio::spawn(async move {
                        let _ = bus.unsubscribe(old).await;
                    });
                }
            }
            Err(e) => warn!(error = %e, "failed to subscribe engagement forwarder"),
        }
    }

    /// RUNNING → PAUSED; the agent winds down cooperatively.
    pub fn pause(&self, engagement_id: &str) -> Result<(), SessionError> {
        let engagement = self.entry(engagement_id)?;
        engagement.machine.pause()?;
        if let Some(active) = engagement.inner.lock().active.take() {
            active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// PAUSED → RUNNING with a fresh agent (and a fresh iteration budget).
    pub async fn resume(&self, engagement_id: &str) -> Result<(), SessionError> {
        let engagement = self.entry(engagement_id)?;
        engagement.machine.resume()?;
        self.spawn_agent(&engagement).await;
        Ok(())
    }

    /// Persist a checkpoint, then transition to STOPPED.
    pub async fn stop(&self, engagement_id: &str) -> Result<(), SessionError> {
        let engagement = self.entry(engagement_id)?;

        // Validate the edge first so an illegal stop does not checkpoint.
        let current = engagement.machine.current_state();
        if !super::machine::is_valid_transition(current, EngagementState::Stopped) {
            return Err(InvalidStateTransition {
                engagement_id: engagement_id.to_string(),
                from: current,
                to: EngagementState::Stopped,
            }
            .into());
        }

        self.checkpoint(&engagement)?;
        engagement.machine.stop()?;
        audit_event(&engagement, json!({"event": "engagement_stopped"}));

        let (active, task) = {
            let mut inner = engagement.inner.lock();
            (inner.active.take(), inner.task.take())
        };
        if let Some(active) = active {
            active.store(false, Ordering::SeqCst);
        }
        if let Some(task) = task {
            // Cooperative exit first; the abort is a backstop for an agent
            // parked on a long await.
            tokio::time::sleep(Duration::from_millis(10)).await;
            task.abort();
        }
        Ok(())
    }

    fn checkpoint(&self, engagement: &Engagement) -> Result<PathBuf, SessionError> {
        let (agents, findings) = {
            let inner = engagement.inner.lock();
            let agents: Vec<AgentSnapshot> = inner
                .agent_ids
                .iter()
                .map(|agent_id| AgentSnapshot {
                    agent_id: agent_id.as_str().to_string(),
                    agent_type: "attack".to_string(),
                    state: json!({
                        "target": engagement.config.target,
                        "findings_count": inner.findings.len(),
                    }),
                    last_action_id: None,
                })
                .collect();
            (agents, inner.findings.clone())
        };
        let scope = engagement.scope_path();
        Ok(self.deps.checkpoints.save(
            engagement.id.as_str(),
            scope.as_deref(),
            &agents,
            &findings,
        )?)
    }

    /// Trip the engagement's emergency halt.
    pub async fn halt(
        &self,
        engagement_id: &str,
        reason: &str,
        who: &str,
    ) -> Result<HaltOutcome, SessionError> {
        let engagement = self.entry(engagement_id)?;
        let outcome = engagement.halt.trigger(reason, who).await;
        audit_event(
            &engagement,
            json!({"event": "emergency_halt", "reason": reason, "triggered_by": who}),
        );
        Ok(outcome)
    }

    /// Attach a stream callback. Subscriptions survive pause/resume and are
    /// removed on detach, disconnect, COMPLETE, or engagement removal.
    pub fn subscribe(
        &self,
        engagement_id: &str,
        sender: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<SubscriptionId, SessionError> {
        let engagement = self.entry(engagement_id)?;
        let subscription_id = SubscriptionId::new();
        engagement.inner.lock().subscriptions.insert(subscription_id.clone(), sender);
        Ok(subscription_id)
    }

    pub fn unsubscribe(&self, engagement_id: &str, subscription_id: &str) -> bool {
        let Ok(engagement) = self.entry(engagement_id) else {
            return false;
        };
        let removed = engagement.inner.lock().subscriptions.remove(subscription_id).is_some();
        removed
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.engagements.lock().values().map(|e| e.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub fn get(&self, engagement_id: &str) -> Result<SessionSummary, SessionError> {
        Ok(self.entry(engagement_id)?.summary())
    }

    /// Initial state snapshot for `engagement.attach`.
    pub fn snapshot(&self, engagement_id: &str) -> Result<Value, SessionError> {
        let engagement = self.entry(engagement_id)?;
        let inner = engagement.inner.lock();
        Ok(json!({
            "engagement_id": engagement.id.as_str(),
            "state": engagement.machine.current_state().as_str(),
            "target": engagement.config.target,
            "agents": inner.agent_ids.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            "findings_count": inner.findings.len(),
        }))
    }

    /// STOPPED → COMPLETED; closes all subscriber streams.
    pub fn complete(&self, engagement_id: &str) -> Result<(), SessionError> {
        let engagement = self.entry(engagement_id)?;
        engagement.machine.complete()?;
        engagement.inner.lock().subscriptions.clear();
        Ok(())
    }

    /// Drop an engagement entirely. Its checkpoint stays on disk.
    pub async fn remove(&self, engagement_id: &str) -> Result<(), SessionError> {
        let engagement = self
            .engagements
            .lock()
            .remove(engagement_id)
            .ok_or_else(|| SessionError::NotFound(engagement_id.to_string()))?;

        let (active, task, token) = {
            let mut inner = engagement.inner.lock();
            inner.subscriptions.clear();
            (inner.active.take(), inner.task.take(), inner.bus_token.take())
        };
        if let Some(active) = active {
            active.store(false, Ordering::SeqCst);
        }
        if let Some(task) = task {
            task.abort();
        }
        if let Some(token) = token {
            let _ = self.deps.bus.unsubscribe(token).await;
        }
        let _ = self.deps.keys.delete(engagement_id);
        info!(engagement_id, "engagement removed");
        Ok(())
    }

    /// Wind every engagement down: pause, checkpoint, stop, notify
    /// subscribers, close streams. Completes (or force-cleans) within the
    /// timeout and reports per-engagement error lists.
    pub async fn graceful_shutdown(
        &self,
        timeout: Duration,
    ) -> HashMap<String, Vec<String>> {
        match tokio::time::timeout(timeout, self.drain_all()).await {
            Ok(errors) => errors,
            Err(_) => {
                warn!("graceful shutdown deadline exceeded, forcing cleanup");
                self.force_cleanup()
            }
        }
    }

    async fn drain_all(&self) -> HashMap<String, Vec<String>> {
        let engagements: Vec<Arc<Engagement>> =
            self.engagements.lock().values().cloned().collect();
        let mut all_errors = HashMap::new();

        for engagement in engagements {
            let id = engagement.id.as_str().to_string();
            let mut errors = Vec::new();

            if engagement.machine.current_state() == EngagementState::Running {
                if let Err(e) = engagement.machine.pause() {
                    errors.push(e.to_string());
                }
                if let Some(active) = engagement.inner.lock().active.take() {
                    active.store(false, Ordering::SeqCst);
                }
            }

            // Checkpoint before closing anything so no finding is lost.
            if let Err(e) = self.checkpoint(&engagement) {
                errors.push(e.to_string());
            }
            if engagement.machine.current_state() == EngagementState::Paused {
                if let Err(e) = engagement.machine.stop() {
                    errors.push(e.to_string());
                }
            }

            engagement.fan_out(&StreamEvent::new(
                StreamEventType::DaemonShutdown,
                json!({"engagement_id": id}),
            ));
            let task = {
                let mut inner = engagement.inner.lock();
                inner.subscriptions.clear();
                inner.task.take()
            };
            if let Some(task) = task {
                task.abort();
            }

            all_errors.insert(id, errors);
        }
        all_errors
    }

    fn force_cleanup(&self) -> HashMap<String, Vec<String>> {
        let engagements: Vec<Arc<Engagement>> =
            self.engagements.lock().values().cloned().collect();
        let mut all_errors = HashMap::new();
        for engagement in engagements {
            let mut inner = engagement.inner.lock();
            if let Some(active) = inner.active.take() {
                active.store(false, Ordering::SeqCst);
            }
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            inner.subscriptions.clear();
            all_errors.insert(
                engagement.id.as_str().to_string(),
                vec!["shutdown deadline exceeded, forced cleanup".to_string()],
            );
        }
        all_errors
    }
}

/// Best-effort signed audit write; a degraded broker only logs.
fn audit_event(engagement: &Arc<Engagement>, event: Value) {
    let audit = Arc::clone(&engagement.audit);
    let engagement_id = engagement.id.as_str().to_string();
    tokio::spawn(async move {
        if let Err(e) = audit.append(event).await {
            warn!(engagement_id, error = %e, "audit append failed");
        }
    });
}

/// Map one bus event into a stream event for this engagement's
/// subscribers, and record findings as they arrive.
fn forward_bus_event(engagement: &Engagement, agent_id: &str, channel: &str, payload: &str) {
    if channel.starts_with("agents:") {
        let data: Value = serde_json::from_str(payload).unwrap_or(Value::Null);
        engagement.fan_out(&StreamEvent::new(StreamEventType::AgentStatus, data));
    } else if channel.starts_with("findings:") {
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        if let Ok(finding) = Finding::from_parts(value.clone()) {
            engagement.inner.lock().findings.push(finding);
        }
        engagement.fan_out(&StreamEvent::new(StreamEventType::Finding, value));
    } else if channel == "swarm:log" {
        let data: Value = serde_json::from_str(payload).unwrap_or(Value::Null);
        // The log channel is shared; only forward this engagement's agent.
        if data.get("agent_id").and_then(Value::as_str) == Some(agent_id) {
            engagement.fan_out(&StreamEvent::new(StreamEventType::Log, data));
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

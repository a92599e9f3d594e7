// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-engagement lifecycle state machine.
//!
//! Exactly six transitions are legal; anything else fails and leaves the
//! state untouched. Observers watch transitions through an event channel
//! rather than inline callbacks, so a stuck observer can never block a
//! transition.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngagementState {
    Initializing,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl EngagementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementState::Initializing => "INITIALIZING",
            EngagementState::Running => "RUNNING",
            EngagementState::Paused => "PAUSED",
            EngagementState::Stopped => "STOPPED",
            EngagementState::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for EngagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six legal transitions.
pub const VALID_TRANSITIONS: [(EngagementState, EngagementState); 6] = [
    (EngagementState::Initializing, EngagementState::Running),
    (EngagementState::Running, EngagementState::Paused),
    (EngagementState::Paused, EngagementState::Running),
    (EngagementState::Running, EngagementState::Stopped),
    (EngagementState::Paused, EngagementState::Stopped),
    (EngagementState::Stopped, EngagementState::Completed),
];

pub fn is_valid_transition(from: EngagementState, to: EngagementState) -> bool {
    VALID_TRANSITIONS.contains(&(from, to))
}

pub fn valid_targets(from: EngagementState) -> Vec<EngagementState> {
    VALID_TRANSITIONS
        .iter()
        .filter(|(f, _)| *f == from)
        .map(|(_, to)| *to)
        .collect()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid state transition for {engagement_id}: {from} -> {to}")]
pub struct InvalidStateTransition {
    pub engagement_id: String,
    pub from: EngagementState,
    pub to: EngagementState,
}

struct MachineState {
    current: EngagementState,
    history: Vec<(EngagementState, DateTime<Utc>)>,
}

pub struct EngagementStateMachine {
    engagement_id: String,
    state: Mutex<MachineState>,
    events: broadcast::Sender<(EngagementState, EngagementState)>,
}

impl EngagementStateMachine {
    pub fn new(engagement_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        EngagementStateMachine {
            engagement_id: engagement_id.into(),
            state: Mutex::new(MachineState {
                current: EngagementState::Initializing,
                history: vec![(EngagementState::Initializing, Utc::now())],
            }),
            events,
        }
    }

    pub fn engagement_id(&self) -> &str {
        &self.engagement_id
    }

    pub fn current_state(&self) -> EngagementState {
        self.state.lock().current
    }

    /// Full `(state, timestamp)` history, oldest first.
    pub fn history(&self) -> Vec<(EngagementState, DateTime<Utc>)> {
        self.state.lock().history.clone()
    }

    /// Apply a transition. On an illegal edge the state is unchanged and
    /// the error carries the attempted pair.
    pub fn transition(&self, to: EngagementState) -> Result<(), InvalidStateTransition> {
        let from = {
            let mut state = self.state.lock();
            let from = state.current;
            if !is_valid_transition(from, to) {
                return Err(InvalidStateTransition {
                    engagement_id: self.engagement_id.clone(),
                    from,
                    to,
                });
            }
            state.current = to;
            state.history.push((to, Utc::now()));
            from
        };
        debug!(engagement_id = %self.engagement_id, %from, %to, "state transition");
        // No receivers is fine; observers come and go.
        let _ = self.events.send((from, to));
        Ok(())
    }

    pub fn start(&self) -> Result<(), InvalidStateTransition> {
        self.transition(EngagementState::Running)
    }

    pub fn pause(&self) -> Result<(), InvalidStateTransition> {
        self.transition(EngagementState::Paused)
    }

    pub fn resume(&self) -> Result<(), InvalidStateTransition> {
        self.transition(EngagementState::Running)
    }

    pub fn stop(&self) -> Result<(), InvalidStateTransition> {
        self.transition(EngagementState::Stopped)
    }

    pub fn complete(&self) -> Result<(), InvalidStateTransition> {
        self.transition(EngagementState::Completed)
    }

    /// Watch transitions as `(old, new)` pairs.
    pub fn subscribe(&self) -> broadcast::Receiver<(EngagementState, EngagementState)> {
        self.events.subscribe()
    }

    /// Spawn an observer task over the transition channel. An observer that
    /// fails or wedges only affects its own task.
    pub fn observe<F>(&self, observer: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(EngagementState, EngagementState) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            while let Ok((from, to)) = receiver.recv().await {
                observer(from, to);
            }
        })
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;

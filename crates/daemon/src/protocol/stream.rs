// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream events pushed to attached clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types an attached client may receive. Closed for now; clients
/// ignore types they do not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    StateChange,
    AgentStatus,
    Finding,
    Log,
    Heartbeat,
    DaemonShutdown,
}

/// One event on an attached connection: `{"event_type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event_type: StreamEventType, data: Value) -> Self {
        StreamEvent { event_type, data }
    }

    pub fn heartbeat() -> Self {
        StreamEvent::new(StreamEventType::Heartbeat, Value::Object(Default::default()))
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;

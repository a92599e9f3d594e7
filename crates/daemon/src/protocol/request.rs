// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request from a client to the daemon.
///
/// `command` stays a string at this layer so unknown commands decode and
/// can be answered with a protocol error instead of dropping the
/// connection. Unknown extra fields are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub params: Value,
    pub request_id: String,
}

impl Request {
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Request {
            command: command.into(),
            params,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Fetch a required string parameter.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn param_bool(&self, name: &str) -> bool {
        self.params.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response from the daemon to a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `"ok"` or `"error"`.
    pub status: String,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub request_id: String,
}

impl Response {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Response {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            request_id: request_id.into(),
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Response {
            status: "error".to_string(),
            data: None,
            error: Some(message.into()),
            request_id: request_id.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! At-least-once audit stream with HMAC-signed entries.
//!
//! Audit writes never buffer: when the broker is down they fail explicitly
//! so the caller knows the trail has a gap. Readers verify each entry's
//! signature and silently drop anything unsigned or tampered, with a
//! security log.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::broker::{Broker, BrokerError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit stream unavailable: broker is not connected")]
    Disconnected,

    #[error(transparent)]
    Broker(BrokerError),

    #[error("audit event is not serializable")]
    BadEvent,
}

/// Writer/reader for one engagement's audit stream.
pub struct AuditStream {
    broker: Arc<dyn Broker>,
    stream: String,
    key: Vec<u8>,
}

impl AuditStream {
    pub fn new(broker: Arc<dyn Broker>, engagement_id: &str, key: impl Into<Vec<u8>>) -> Self {
        AuditStream {
            broker,
            stream: format!("audit:{engagement_id}"),
            key: key.into(),
        }
    }

    fn sign(&self, payload: &str) -> String {
        // Key length is unconstrained for HMAC; new_from_slice cannot fail.
        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(payload.as_bytes());
        format!("{:x}", mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else { return false };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else { return false };
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Append a signed audit event. Fails fast while degraded.
    pub async fn append(&self, event: Value) -> Result<String, AuditError> {
        if !self.broker.is_connected() {
            return Err(AuditError::Disconnected);
        }
        let payload = serde_json::to_string(&event).map_err(|_| AuditError::BadEvent)?;
        let mut fields = HashMap::new();
        fields.insert("sig".to_string(), self.sign(&payload));
        fields.insert("payload".to_string(), payload);
        self.broker.xadd(&self.stream, fields).await.map_err(|e| match e {
            BrokerError::Disconnected => AuditError::Disconnected,
            other => AuditError::Broker(other),
        })
    }

    /// Read up to `count` verified events for a consumer group. Tampered or
    /// unsigned entries are dropped (and acked, so they are not redelivered).
    pub async fn read(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<(String, Value)>, AuditError> {
        let entries = self
            .broker
            .xread_group(&self.stream, group, consumer, count)
            .await
            .map_err(|e| match e {
                BrokerError::Disconnected => AuditError::Disconnected,
                other => AuditError::Broker(other),
            })?;

        let mut verified = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload = entry.fields.get("payload").map(String::as_str).unwrap_or("");
            let signature = entry.fields.get("sig").map(String::as_str).unwrap_or("");
            if payload.is_empty() || !self.verify(payload, signature) {
                warn!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    "dropping audit entry with missing or invalid HMAC"
                );
                let _ = self.broker.xack(&self.stream, group, &entry.id).await;
                continue;
            }
            match serde_json::from_str(payload) {
                Ok(value) => verified.push((entry.id, value)),
                Err(_) => {
                    warn!(stream = %self.stream, entry_id = %entry.id, "dropping unparseable audit entry");
                    let _ = self.broker.xack(&self.stream, group, &entry.id).await;
                }
            }
        }
        Ok(verified)
    }

    pub async fn ack(&self, group: &str, entry_id: &str) -> Result<(), AuditError> {
        self.broker.xack(&self.stream, group, entry_id).await.map_err(AuditError::Broker)
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;

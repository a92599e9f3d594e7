// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed event bus.
//!
//! Publish paths validate the channel, serialize the payload, and stay safe
//! under broker outages: regular publishes land in a bounded buffer that is
//! flushed when the reconnect task re-establishes the connection. Subscriber
//! callbacks run behind a guard so one failing consumer cannot take the bus
//! down.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use opfor_core::Finding;

use crate::broker::{Broker, BrokerError, SubscriberFn};
use crate::channel::{target_hash, validate_channel, validate_pattern, ChannelError};
use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("payload must be a string, object, or array")]
    BadPayload,

    #[error(transparent)]
    AgentStatus(#[from] AgentStatusError),
}

/// Schema violations in agent status payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentStatusError {
    #[error("agent status must be an object")]
    NotAnObject,

    #[error("agent status missing required field {0:?}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Max buffered publishes while degraded.
    pub buffer_capacity: usize,
    /// Buffered publishes older than this are dropped at flush time.
    pub buffer_max_age: Duration,
    /// Publishes slower than this log a warning.
    pub slow_publish: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            buffer_capacity: 1000,
            buffer_max_age: Duration::from_secs(60),
            slow_publish: Duration::from_millis(500),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct Buffered {
    channel: String,
    payload: String,
    at: Instant,
}

struct Inner {
    broker: Arc<dyn Broker>,
    config: EventBusConfig,
    buffer: Mutex<VecDeque<Buffered>>,
    reconnecting: AtomicBool,
}

/// Thin typed wrapper over the broker. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_config(broker, EventBusConfig::default())
    }

    pub fn with_config(broker: Arc<dyn Broker>, config: EventBusConfig) -> Self {
        EventBus {
            inner: Arc::new(Inner {
                broker,
                config,
                buffer: Mutex::new(VecDeque::new()),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.inner.broker)
    }

    pub fn is_degraded(&self) -> bool {
        !self.inner.broker.is_connected()
    }

    /// Publish a payload on a validated channel.
    ///
    /// Strings pass through unchanged; objects and arrays are serialized to
    /// JSON; anything else is rejected. While the broker is down the payload
    /// is buffered and the reconnect task flushes it later.
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<(), BusError> {
        validate_channel(channel)?;
        let encoded = encode_payload(payload)?;
        self.publish_raw(channel, encoded).await
    }

    async fn publish_raw(&self, channel: &str, payload: String) -> Result<(), BusError> {
        if !self.inner.broker.is_connected() {
            self.buffer(channel, payload);
            self.ensure_reconnect_task();
            return Ok(());
        }

        let start = Instant::now();
        match self.inner.broker.publish(channel, &payload).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                if elapsed > self.inner.config.slow_publish {
                    warn!(channel, elapsed_ms = elapsed.as_millis() as u64, "slow publish");
                }
                Ok(())
            }
            Err(BrokerError::Disconnected) => {
                self.buffer(channel, payload);
                self.ensure_reconnect_task();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn buffer(&self, channel: &str, payload: String) {
        let mut buffer = self.inner.buffer.lock();
        if buffer.len() >= self.inner.config.buffer_capacity {
            buffer.pop_front();
            warn!(channel, "publish buffer full, dropping oldest entry");
        }
        buffer.push_back(Buffered {
            channel: channel.to_string(),
            payload,
            at: Instant::now(),
        });
    }

    /// Number of publishes waiting for reconnection.
    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Re-publish everything buffered during the outage, skipping entries
    /// past the age limit. On a mid-flush failure the unsent remainder goes
    /// back into the buffer.
    pub async fn flush_buffered(&self) -> Result<usize, BusError> {
        let max_age = self.inner.config.buffer_max_age;
        let mut drained: VecDeque<Buffered> = {
            let mut buffer = self.inner.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        let mut flushed = 0;
        while let Some(entry) = drained.pop_front() {
            if entry.at.elapsed() > max_age {
                debug!(channel = %entry.channel, "dropping stale buffered publish");
                continue;
            }
            if let Err(e) = self.inner.broker.publish(&entry.channel, &entry.payload).await {
                let mut buffer = self.inner.buffer.lock();
                buffer.push_back(entry);
                buffer.extend(drained);
                return Err(e.into());
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    fn ensure_reconnect_task(&self) {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = self.clone();
        tokio::spawn(async move {
            let policy = bus.inner.config.reconnect;
            let mut attempt = 0u32;
            while !bus.inner.broker.is_connected() {
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt = attempt.saturating_add(1);
                match bus.inner.broker.reconnect().await {
                    Ok(()) => break,
                    Err(e) => debug!(attempt, error = %e, "broker reconnect failed"),
                }
            }
            match bus.flush_buffered().await {
                Ok(flushed) if flushed > 0 => {
                    debug!(flushed, "flushed buffered publishes after reconnect")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to flush buffered publishes"),
            }
            bus.inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Subscribe a guarded callback to a channel pattern.
    ///
    /// Callback errors are logged and absorbed; the subscription stays live.
    pub async fn subscribe<F, Fut>(&self, pattern: &str, callback: F) -> Result<u64, BusError>
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        validate_pattern(pattern)?;
        let guarded: SubscriberFn = Arc::new(move |channel: String, payload: String| {
            let fut = callback(channel.clone(), payload);
            Box::pin(async move {
                if let Err(e) = fut.await {
                    warn!(channel, error = %e, "subscriber callback failed");
                }
            })
        });
        Ok(self.inner.broker.psubscribe(pattern, guarded).await?)
    }

    /// Subscribe one guarded callback to several patterns through a single
    /// ordered delivery queue.
    pub async fn subscribe_many<F, Fut>(
        &self,
        patterns: &[String],
        callback: F,
    ) -> Result<u64, BusError>
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        for pattern in patterns {
            validate_pattern(pattern)?;
        }
        let guarded: SubscriberFn = Arc::new(move |channel: String, payload: String| {
            let fut = callback(channel.clone(), payload);
            Box::pin(async move {
                if let Err(e) = fut.await {
                    warn!(channel, error = %e, "subscriber callback failed");
                }
            })
        });
        Ok(self.inner.broker.psubscribe_many(patterns, guarded).await?)
    }

    pub async fn unsubscribe(&self, token: u64) -> Result<(), BusError> {
        Ok(self.inner.broker.unsubscribe(token).await?)
    }

    /// Publish a finding on its derived channel
    /// `findings:<target-hash>:<type>`.
    pub async fn publish_finding(&self, finding: &Finding) -> Result<(), BusError> {
        let channel =
            format!("findings:{}:{}", target_hash(&finding.target), finding.finding_type);
        let payload = serde_json::to_value(finding).map_err(|_| BusError::BadPayload)?;
        self.publish(&channel, payload).await
    }

    /// Publish an agent status update, enforcing the status schema.
    pub async fn publish_agent_status(
        &self,
        agent_id: &str,
        status: Value,
    ) -> Result<(), BusError> {
        let Some(map) = status.as_object() else {
            return Err(AgentStatusError::NotAnObject.into());
        };
        for field in ["state", "task", "timestamp"] {
            if !map.contains_key(field) {
                return Err(AgentStatusError::MissingField(field).into());
            }
        }
        self.publish(&format!("agents:{agent_id}:status"), status).await
    }

    /// Bind a handler to the control-kill channel. Payloads may be JSON
    /// (`{"reason": "..."}`) or a bare string reason.
    pub async fn subscribe_kill_switch<F, Fut>(&self, handler: F) -> Result<u64, BusError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe("control:kill", move |_channel, payload| {
            let reason = serde_json::from_str::<Value>(&payload)
                .ok()
                .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(payload);
            let fut = handler(reason);
            async move {
                fut.await;
                Ok(())
            }
        })
        .await
    }
}

fn encode_payload(payload: Value) -> Result<String, BusError> {
    match payload {
        Value::String(s) => Ok(s),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(&payload).map_err(|_| BusError::BadPayload)
        }
        _ => Err(BusError::BadPayload),
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

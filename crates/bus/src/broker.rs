// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker abstraction: pub/sub channels plus append-only streams.
//!
//! The daemon runs against [`MemoryBroker`] (in-process fan-out). The trait
//! exists so an external broker can be slotted in without touching the bus,
//! and so tests can flip connectivity to exercise degraded mode.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Async subscriber callback: `(channel, payload)`.
pub type SubscriberFn =
    Arc<dyn Fn(String, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is not connected")]
    Disconnected,

    #[error("stream error: {0}")]
    Stream(String),
}

/// One entry in an append-only stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Pub/sub plus streams, in the shape the event bus consumes.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver `payload` to every subscription matching `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Register a callback for channels matching `pattern` (exact name or
    /// trailing-`*` prefix match). Returns a token for [`unsubscribe`].
    ///
    /// [`unsubscribe`]: Broker::unsubscribe
    async fn psubscribe(&self, pattern: &str, callback: SubscriberFn)
        -> Result<u64, BrokerError>;

    /// Like [`psubscribe`] but matching any of several patterns through one
    /// delivery queue, so the callback sees events in publish order across
    /// all of them.
    ///
    /// [`psubscribe`]: Broker::psubscribe
    async fn psubscribe_many(
        &self,
        patterns: &[String],
        callback: SubscriberFn,
    ) -> Result<u64, BrokerError>;

    async fn unsubscribe(&self, token: u64) -> Result<(), BrokerError>;

    /// Append an entry to a stream, returning its id.
    async fn xadd(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<String, BrokerError>;

    /// Read up to `count` undelivered entries for `group`, advancing the
    /// group cursor. Each group sees the full stream; within a group each
    /// entry is delivered once and stays pending until acked.
    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    async fn xack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    /// Attempt to re-establish the broker connection.
    async fn reconnect(&self) -> Result<(), BrokerError>;
}

struct Subscription {
    token: u64,
    patterns: Vec<String>,
    queue: mpsc::UnboundedSender<(String, String)>,
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    pending: Vec<String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

/// In-process broker.
///
/// Every subscription owns a queue drained by a dedicated task, so delivery
/// to one subscriber is ordered and a wedged subscriber cannot block
/// publishers or other subscribers.
pub struct MemoryBroker {
    subs: Mutex<Vec<Subscription>>,
    streams: Mutex<HashMap<String, StreamState>>,
    next_token: AtomicU64,
    next_entry: AtomicU64,
    connected: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBroker {
            subs: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            next_entry: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        })
    }

    /// Simulate a broker outage (tests and fault drills).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn matches(patterns: &[String], channel: &str) -> bool {
        patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => channel.starts_with(prefix),
            None => pattern == channel,
        })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        let mut subs = self.subs.lock();
        // Drop subscriptions whose worker has gone away.
        subs.retain(|sub| {
            if !Self::matches(&sub.patterns, channel) {
                return true;
            }
            sub.queue.send((channel.to_string(), payload.to_string())).is_ok()
        });
        Ok(())
    }

    async fn psubscribe(
        &self,
        pattern: &str,
        callback: SubscriberFn,
    ) -> Result<u64, BrokerError> {
        self.psubscribe_many(&[pattern.to_string()], callback).await
    }

    async fn psubscribe_many(
        &self,
        patterns: &[String],
        callback: SubscriberFn,
    ) -> Result<u64, BrokerError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
        tokio::spawn(async move {
            while let Some((channel, payload)) = rx.recv().await {
                callback(channel, payload).await;
            }
        });
        self.subs.lock().push(Subscription {
            token,
            patterns: patterns.to_vec(),
            queue: tx,
        });
        Ok(token)
    }

    async fn unsubscribe(&self, token: u64) -> Result<(), BrokerError> {
        self.subs.lock().retain(|sub| sub.token != token);
        Ok(())
    }

    async fn xadd(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<String, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        let id = format!("{}-0", self.next_entry.fetch_add(1, Ordering::SeqCst));
        let mut streams = self.streams.lock();
        streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .push(StreamEntry { id: id.clone(), fields });
        Ok(id)
    }

    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let entries = state.entries.clone();
        let group_state = state.groups.entry(group.to_string()).or_default();

        let end = entries.len().min(group_state.cursor + count);
        let batch: Vec<StreamEntry> = entries[group_state.cursor..end].to_vec();
        for entry in &batch {
            group_state.pending.push(entry.id.clone());
        }
        group_state.cursor = end;
        Ok(batch)
    }

    async fn xack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock();
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.retain(|id| id != entry_id);
                return Ok(());
            }
        }
        Err(BrokerError::Stream(format!("unknown group {group} on {stream}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;

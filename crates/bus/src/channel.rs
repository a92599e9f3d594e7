// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel-name validation.
//!
//! Channel names are `<namespace>:<rest>` with the namespace drawn from a
//! closed set. Rejected names never reach the broker.

use thiserror::Error;

pub use opfor_core::finding::target_hash;

/// Closed set of channel namespaces.
const NAMESPACES: &[&str] =
    &["findings", "agents", "control", "authorization", "swarm", "orchestrator", "killchain"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel name must be <namespace>:<rest>: {0:?}")]
    MissingNamespace(String),

    #[error("unknown channel namespace {namespace:?} in {channel:?}")]
    UnknownNamespace { namespace: String, channel: String },

    #[error("malformed channel name: {0:?}")]
    Malformed(String),
}

/// Validate a channel name against the closed namespace set.
///
/// Accepted shapes:
/// - `findings:<target-hash>:<type>`
/// - `agents:<id>:status`
/// - `control:<event>`, `authorization:<id>`
/// - `swarm:*`, `orchestrator:*`, `killchain:*` (any non-empty rest)
pub fn validate_channel(channel: &str) -> Result<(), ChannelError> {
    let Some((namespace, rest)) = channel.split_once(':') else {
        return Err(ChannelError::MissingNamespace(channel.to_string()));
    };
    if !NAMESPACES.contains(&namespace) {
        return Err(ChannelError::UnknownNamespace {
            namespace: namespace.to_string(),
            channel: channel.to_string(),
        });
    }
    if rest.is_empty() || rest.starts_with(':') || rest.ends_with(':') {
        return Err(ChannelError::Malformed(channel.to_string()));
    }
    match namespace {
        // findings:<hash8>:<type> — both segments required
        "findings" => {
            let mut parts = rest.splitn(2, ':');
            let hash = parts.next().unwrap_or_default();
            let kind = parts.next().unwrap_or_default();
            if hash.len() != 8
                || !hash.chars().all(|c| c.is_ascii_hexdigit())
                || kind.is_empty()
            {
                return Err(ChannelError::Malformed(channel.to_string()));
            }
        }
        // agents:<id>:status
        "agents" => {
            let mut parts = rest.splitn(2, ':');
            let id = parts.next().unwrap_or_default();
            if id.is_empty() || parts.next() != Some("status") {
                return Err(ChannelError::Malformed(channel.to_string()));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate a subscription pattern: either a full channel name or a
/// trailing-`*` pattern whose namespace is from the closed set.
pub fn validate_pattern(pattern: &str) -> Result<(), ChannelError> {
    if let Some(prefix) = pattern.strip_suffix('*') {
        let namespace = prefix.split(':').next().unwrap_or_default();
        if NAMESPACES.contains(&namespace) {
            return Ok(());
        }
        return Err(ChannelError::UnknownNamespace {
            namespace: namespace.to_string(),
            channel: pattern.to_string(),
        });
    }
    validate_channel(pattern)
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

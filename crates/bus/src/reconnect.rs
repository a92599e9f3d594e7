// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection backoff policy.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter: base 1 s doubling to a 10 s cap, ±10%.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            jitter: 0.10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th retry (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(32));
        let capped = exp.min(self.cap.as_millis()) as f64;
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((capped * factor) as u64)
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional enrichment seam.
//!
//! The vulnerability-intelligence aggregator and RAG store live outside the
//! runtime; the runtime only asks for best-effort enrichment of a finding.

use async_trait::async_trait;

use opfor_core::Finding;

/// External knowledge source, consumed via this interface only.
#[async_trait]
pub trait Knowledge: Send + Sync {
    /// Return enrichment for a finding, or `None` when nothing is known.
    /// Must never fail the caller.
    async fn enrich(&self, finding: &Finding) -> Option<serde_json::Value>;
}

/// Knowledge source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKnowledge;

#[async_trait]
impl Knowledge for NoopKnowledge {
    async fn enrich(&self, _finding: &Finding) -> Option<serde_json::Value> {
        None
    }
}

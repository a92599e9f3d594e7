// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds shared across crates.

use thiserror::Error;

/// The engagement frozen flag is set. Raised by every agent action check
/// once the emergency halt has fired; never recovered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("engagement {engagement_id} is frozen (triggered by {triggered_by}): {reason}")]
pub struct HaltTriggered {
    pub engagement_id: String,
    pub triggered_by: String,
    pub reason: String,
}

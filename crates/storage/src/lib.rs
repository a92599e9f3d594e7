// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable engagement checkpoints.
//!
//! One content-signed snapshot per engagement, written with a
//! write-to-tmp + fsync + atomic-rename discipline and verified on load.

mod canonical;
mod checkpoint;

pub use canonical::canonical_json;
pub use checkpoint::{
    AgentSnapshot, CheckpointData, CheckpointError, CheckpointStore, SCHEMA_VERSION,
};

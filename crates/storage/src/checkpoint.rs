// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic, content-signed, scope-bound checkpoints.
//!
//! Layout: `<base>/engagements/<id>/checkpoint.json`, one per engagement,
//! overwritten on each save. The content signature is SHA-256 over the
//! canonical serialization of metadata, agents, and findings; the optional
//! scope hash binds the checkpoint to the scope file it was taken under.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use opfor_core::{Finding, FindingError};

use crate::canonical::canonical_json;

/// Current checkpoint schema version (dotted string).
pub const SCHEMA_VERSION: &str = "2.0";

const CHECKPOINT_FILE: &str = "checkpoint.json";
const TMP_FILE: &str = "checkpoint.json.tmp";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("checkpoint content signature mismatch")]
    Integrity,

    #[error("checkpoint schema {found} is newer than supported {current}")]
    IncompatibleSchema { found: String, current: String },

    #[error("scope file changed since checkpoint was written")]
    ScopeChanged,

    #[error("checkpoint holds an invalid finding: {0}")]
    BadFinding(#[from] FindingError),
}

/// Per-agent state captured at checkpoint time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub agent_type: String,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_id: Option<String>,
}

/// A loaded checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointData {
    pub engagement_id: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub scope_hash: String,
    pub agents: Vec<AgentSnapshot>,
    pub findings: Vec<Finding>,
}

/// Store rooted at `<base>`; checkpoints live under `engagements/`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    base: PathBuf,
}

impl CheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        CheckpointStore { base: base.into() }
    }

    pub fn checkpoint_path(&self, engagement_id: &str) -> PathBuf {
        self.base.join("engagements").join(engagement_id).join(CHECKPOINT_FILE)
    }

    /// Write a checkpoint: tmp file → fsync → atomic rename. On any error
    /// the tmp file and a directory created by this call are removed.
    pub fn save(
        &self,
        engagement_id: &str,
        scope_path: Option<&Path>,
        agents: &[AgentSnapshot],
        findings: &[Finding],
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.checkpoint_path(engagement_id);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.base.clone());
        let dir_existed = dir.exists();
        fs::create_dir_all(&dir)?;

        let result = self.save_inner(engagement_id, scope_path, agents, findings, &path, &dir);
        if result.is_err() {
            let _ = fs::remove_file(dir.join(TMP_FILE));
            if !dir_existed {
                let _ = fs::remove_dir_all(&dir);
            }
        }
        result
    }

    fn save_inner(
        &self,
        engagement_id: &str,
        scope_path: Option<&Path>,
        agents: &[AgentSnapshot],
        findings: &[Finding],
        path: &Path,
        dir: &Path,
    ) -> Result<PathBuf, CheckpointError> {
        let scope_hash = match scope_path {
            Some(scope) => hash_file(scope)?,
            None => String::new(),
        };

        let mut metadata = json!({
            "engagement_id": engagement_id,
            "schema_version": SCHEMA_VERSION,
            "created_at": Utc::now().to_rfc3339(),
            "scope_hash": scope_hash,
        });
        let agents_value = serde_json::to_value(agents)?;
        let findings_value = serde_json::to_value(findings)?;

        let signature = content_signature(&metadata, &agents_value, &findings_value);
        metadata["signature"] = Value::String(signature);

        let document = json!({
            "metadata": metadata,
            "agents": agents_value,
            "findings": findings_value,
        });

        let tmp = dir.join(TMP_FILE);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(&document)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        if let Ok(dir_handle) = fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }

        info!(engagement_id, path = %path.display(), "checkpoint saved");
        Ok(path.to_path_buf())
    }

    /// Load and verify a checkpoint.
    ///
    /// Newer schema versions are refused; older ones are accepted with an
    /// upgrade log. A signature mismatch is fatal. When `verify_scope` is
    /// set and both the stored hash and the scope file are present, the
    /// scope file is re-hashed and compared.
    pub fn load(
        &self,
        path: &Path,
        scope_path: Option<&Path>,
        verify_scope: bool,
    ) -> Result<CheckpointData, CheckpointError> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let document: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        let metadata = &document["metadata"];

        let schema_version =
            metadata["schema_version"].as_str().unwrap_or_default().to_string();
        match compare_versions(&schema_version, SCHEMA_VERSION) {
            VersionOrder::Newer => {
                return Err(CheckpointError::IncompatibleSchema {
                    found: schema_version,
                    current: SCHEMA_VERSION.to_string(),
                })
            }
            VersionOrder::Older => {
                info!(
                    found = %schema_version,
                    current = SCHEMA_VERSION,
                    "older checkpoint schema accepted, upgrade available"
                );
            }
            VersionOrder::Same => {}
        }

        let mut unsigned_metadata = metadata.clone();
        let stored_signature = unsigned_metadata["signature"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if let Some(map) = unsigned_metadata.as_object_mut() {
            map.remove("signature");
        }
        let expected =
            content_signature(&unsigned_metadata, &document["agents"], &document["findings"]);
        if stored_signature != expected {
            return Err(CheckpointError::Integrity);
        }

        let scope_hash = metadata["scope_hash"].as_str().unwrap_or_default().to_string();
        if verify_scope && !scope_hash.is_empty() {
            if let Some(scope) = scope_path.filter(|p| p.exists()) {
                if hash_file(scope)? != scope_hash {
                    warn!(path = %path.display(), "scope hash mismatch on checkpoint load");
                    return Err(CheckpointError::ScopeChanged);
                }
            }
        }

        let mut agents: Vec<AgentSnapshot> =
            serde_json::from_value(document["agents"].clone())?;
        // Legacy schemas stored agent state as an embedded JSON string.
        for agent in &mut agents {
            if let Value::String(raw) = &agent.state {
                if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                    agent.state = parsed;
                }
            }
        }

        let findings = document["findings"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| Finding::from_parts(item.clone()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;

        let created_at = metadata["created_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(CheckpointData {
            engagement_id: metadata["engagement_id"].as_str().unwrap_or_default().to_string(),
            schema_version,
            created_at,
            scope_hash,
            agents,
            findings,
        })
    }

    /// Quick integrity check; all errors collapse to `false`.
    pub fn verify(&self, path: &Path) -> bool {
        self.load(path, None, false).is_ok()
    }

    /// Engagement ids with an existing checkpoint file. Entries that are
    /// not directories, or directories without a checkpoint, are skipped.
    pub fn list(&self) -> Vec<(String, PathBuf)> {
        let engagements = self.base.join("engagements");
        let Ok(entries) = fs::read_dir(&engagements) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let checkpoint = dir.join(CHECKPOINT_FILE);
            if checkpoint.exists() {
                found.push((entry.file_name().to_string_lossy().into_owned(), checkpoint));
            }
        }
        found.sort();
        found
    }

    /// Remove an engagement's checkpoint. Returns whether anything was
    /// deleted.
    pub fn delete(&self, engagement_id: &str) -> bool {
        let path = self.checkpoint_path(engagement_id);
        if !path.exists() {
            return false;
        }
        fs::remove_file(&path).is_ok()
    }
}

fn content_signature(metadata: &Value, agents: &Value, findings: &Value) -> String {
    let body = json!({
        "metadata": metadata,
        "agents": agents,
        "findings": findings,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&body).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_file(path: &Path) -> Result<String, CheckpointError> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

enum VersionOrder {
    Older,
    Same,
    Newer,
}

/// Compare dotted version strings numerically, segment by segment. A
/// version that fails to parse is treated as newer (refused).
fn compare_versions(found: &str, current: &str) -> VersionOrder {
    let parse = |s: &str| -> Option<Vec<u32>> {
        s.split('.').map(|seg| seg.parse::<u32>().ok()).collect()
    };
    let (Some(found), Some(current)) = (parse(found), parse(current)) else {
        return VersionOrder::Newer;
    };
    match found.cmp(&current) {
        std::cmp::Ordering::Less => VersionOrder::Older,
        std::cmp::Ordering::Equal => VersionOrder::Same,
        std::cmp::Ordering::Greater => VersionOrder::Newer,
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;

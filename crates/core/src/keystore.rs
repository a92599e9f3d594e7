// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engagement-scoped secrets for audit-stream signing.
//!
//! One 32-byte random key per engagement, stored at
//! `<base>/engagements/<id>/secret.key` with owner-only permissions.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key file has wrong length: {0} bytes")]
    BadLength(usize),
}

/// File-backed store of per-engagement HMAC keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    base: PathBuf,
}

impl KeyStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        KeyStore { base: base.into() }
    }

    fn key_path(&self, engagement_id: &str) -> PathBuf {
        self.base.join("engagements").join(engagement_id).join("secret.key")
    }

    /// Load the engagement key, creating it with fresh random bytes if absent.
    pub fn load_or_create(&self, engagement_id: &str) -> Result<[u8; KEY_LEN], KeyStoreError> {
        let path = self.key_path(engagement_id);
        if path.exists() {
            let bytes = fs::read(&path)?;
            return bytes
                .as_slice()
                .try_into()
                .map_err(|_| KeyStoreError::BadLength(bytes.len()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        write_owner_only(&path, &key)?;
        Ok(key)
    }

    /// Remove the engagement's key. Returns whether anything was deleted.
    pub fn delete(&self, engagement_id: &str) -> Result<bool, KeyStoreError> {
        let path = self.key_path(engagement_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file =
        fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
#[path = "keystore_tests.rs"]
mod tests;

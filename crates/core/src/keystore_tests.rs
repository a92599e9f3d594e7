// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn creates_key_on_first_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    let key = store.load_or_create("eng-1").unwrap();
    assert_eq!(key.len(), KEY_LEN);
    assert!(dir.path().join("engagements/eng-1/secret.key").exists());
}

#[test]
fn load_is_stable_across_calls() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    let a = store.load_or_create("eng-1").unwrap();
    let b = store.load_or_create("eng-1").unwrap();
    assert_eq!(a, b);
}

#[test]
fn keys_differ_per_engagement() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    let a = store.load_or_create("eng-1").unwrap();
    let b = store.load_or_create("eng-2").unwrap();
    assert_ne!(a, b);
}

#[cfg(unix)]
#[test]
fn key_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    store.load_or_create("eng-1").unwrap();
    let mode = std::fs::metadata(dir.path().join("engagements/eng-1/secret.key"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn delete_reports_removal() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    store.load_or_create("eng-1").unwrap();
    assert!(store.delete("eng-1").unwrap());
    assert!(!store.delete("eng-1").unwrap());
}

#[test]
fn truncated_key_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyStore::new(dir.path());
    let path = dir.path().join("engagements/eng-1/secret.key");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"short").unwrap();
    assert!(matches!(store.load_or_create("eng-1"), Err(KeyStoreError::BadLength(5))));
}

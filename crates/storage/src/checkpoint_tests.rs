// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use opfor_core::Severity;

fn store(dir: &tempfile::TempDir) -> CheckpointStore {
    CheckpointStore::new(dir.path())
}

fn agent(n: u32) -> AgentSnapshot {
    AgentSnapshot {
        agent_id: format!("agt-{n}"),
        agent_type: "attack".to_string(),
        state: json!({"target": "10.0.0.5", "iteration": n}),
        last_action_id: (n > 1).then(|| format!("action-{n}")),
    }
}

fn finding() -> Finding {
    Finding::new(
        "sqli",
        Severity::High,
        "SQL injection",
        "10.0.0.5",
        "payload evidence",
        "agt-1",
        "sqlmap",
        "findings:deadbeef:sqli",
    )
    .unwrap()
}

#[test]
fn save_creates_checkpoint_under_engagements() {
    let dir = tempfile::tempdir().unwrap();
    let path = store(&dir).save("eng-1", None, &[], &[]).unwrap();
    assert_eq!(path, dir.path().join("engagements/eng-1/checkpoint.json"));
    assert!(path.exists());
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let agents = vec![agent(1), agent(2)];
    let findings = vec![finding()];

    let path = s.save("eng-1", None, &agents, &findings).unwrap();
    let data = s.load(&path, None, true).unwrap();

    assert_eq!(data.engagement_id, "eng-1");
    assert_eq!(data.schema_version, SCHEMA_VERSION);
    assert_eq!(data.agents, agents);
    assert_eq!(data.findings, findings);
    assert!(data.scope_hash.is_empty());
}

#[test]
fn save_load_is_a_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let findings = vec![finding()];

    let path = s.save("eng-1", None, &[agent(1)], &findings).unwrap();
    let first = s.load(&path, None, true).unwrap();
    let path = s.save("eng-1", None, &first.agents, &first.findings).unwrap();
    let second = s.load(&path, None, true).unwrap();

    assert_eq!(second.agents, first.agents);
    assert_eq!(second.findings, first.findings);
}

#[test]
fn save_overwrites_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    s.save("eng-1", None, &[agent(1)], &[]).unwrap();
    let path = s.save("eng-1", None, &[agent(1), agent(2)], &[]).unwrap();

    let data = s.load(&path, None, true).unwrap();
    assert_eq!(data.agents.len(), 2);
}

#[test]
fn scope_hash_is_stored_and_checked() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let scope = dir.path().join("s.yaml");
    std::fs::write(&scope, "targets: [10.0.0.0/24]\n").unwrap();

    let path = s.save("eng-1", Some(&scope), &[], &[]).unwrap();
    let data = s.load(&path, Some(&scope), true).unwrap();
    assert_eq!(data.scope_hash.len(), 64);

    // Rewriting the scope invalidates the checkpoint...
    std::fs::write(&scope, "targets: [192.168.0.0/16]\n").unwrap();
    let err = s.load(&path, Some(&scope), true).unwrap_err();
    assert!(matches!(err, CheckpointError::ScopeChanged));

    // ...unless scope verification is disabled.
    let data = s.load(&path, Some(&scope), false).unwrap();
    assert_eq!(data.engagement_id, "eng-1");
}

#[test]
fn missing_scope_file_skips_verification() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let scope = dir.path().join("s.yaml");
    std::fs::write(&scope, "targets: []\n").unwrap();
    let path = s.save("eng-1", Some(&scope), &[], &[]).unwrap();

    std::fs::remove_file(&scope).unwrap();
    assert!(s.load(&path, Some(&scope), true).is_ok());
}

#[yare::parameterized(
    metadata = { "eng-1", "eng-x" },
    agents   = { "agt-1", "agt-x" },
    findings = { "SQL injection", "XSS injection" },
)]
fn any_byte_flip_breaks_verification(needle: &str, replacement: &str) {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let path = s.save("eng-1", None, &[agent(1)], &[finding()]).unwrap();
    assert!(s.verify(&path));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(needle), "fixture must contain {needle}");
    std::fs::write(&path, text.replacen(needle, replacement, 1)).unwrap();

    assert!(!s.verify(&path));
    assert!(matches!(s.load(&path, None, false), Err(CheckpointError::Integrity)));
}

#[test]
fn newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let path = s.save("eng-1", None, &[], &[]).unwrap();

    let mut document: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    document["metadata"]["schema_version"] = json!("99.0");
    // Re-sign so only the version differs.
    let mut unsigned = document["metadata"].clone();
    unsigned.as_object_mut().unwrap().remove("signature");
    document["metadata"]["signature"] =
        json!(content_signature(&unsigned, &document["agents"], &document["findings"]));
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

    let err = s.load(&path, None, false).unwrap_err();
    assert!(matches!(err, CheckpointError::IncompatibleSchema { .. }));
}

#[test]
fn older_schema_loads_and_parses_legacy_agent_state() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    let path = s.save("eng-1", None, &[], &[]).unwrap();

    let mut document: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    document["metadata"]["schema_version"] = json!("1.0");
    // Legacy checkpoints embedded agent state as a JSON string.
    document["agents"] = json!([{
        "agent_id": "agt-legacy",
        "agent_type": "attack",
        "state": "{\"target\": \"10.0.0.5\"}",
    }]);
    let mut unsigned = document["metadata"].clone();
    unsigned.as_object_mut().unwrap().remove("signature");
    document["metadata"]["signature"] =
        json!(content_signature(&unsigned, &document["agents"], &document["findings"]));
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

    let data = s.load(&path, None, false).unwrap();
    assert_eq!(data.schema_version, "1.0");
    assert_eq!(data.agents[0].state["target"], "10.0.0.5");
}

#[test]
fn verify_swallows_all_errors() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    assert!(!s.verify(&dir.path().join("nope/checkpoint.json")));

    let garbled = dir.path().join("garbled.json");
    std::fs::write(&garbled, "not json").unwrap();
    assert!(!s.verify(&garbled));
}

#[test]
fn list_skips_incomplete_entries() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    s.save("eng-1", None, &[], &[]).unwrap();
    s.save("eng-2", None, &[], &[]).unwrap();

    // A directory without a checkpoint, and a stray file, are both skipped.
    std::fs::create_dir_all(dir.path().join("engagements/empty-dir")).unwrap();
    std::fs::write(dir.path().join("engagements/stray.txt"), "x").unwrap();

    let ids: Vec<String> = s.list().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["eng-1".to_string(), "eng-2".to_string()]);
}

#[test]
fn delete_reports_removal() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    s.save("eng-1", None, &[], &[]).unwrap();
    assert!(s.delete("eng-1"));
    assert!(!s.delete("eng-1"));
    assert!(s.list().is_empty());
}

#[test]
fn failed_save_cleans_up_fresh_directory() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    // A scope path that cannot be read forces the failure before write.
    let err = s
        .save("eng-gone", Some(std::path::Path::new("/nonexistent/scope.yaml")), &[], &[])
        .unwrap_err();
    assert!(matches!(err, CheckpointError::Io(_)));
    assert!(!dir.path().join("engagements/eng-gone").exists());
}

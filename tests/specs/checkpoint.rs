//! Checkpoint + resume specs, including the scope-binding contract.

use super::prelude::*;

use opfor_storage::{CheckpointError, CheckpointStore};

/// Stop with one scope file, rewrite it, and the checkpoint refuses to
/// load until scope verification is disabled.
#[tokio::test]
async fn checkpoint_detects_scope_change() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;

    let config = engagement_config(&daemon, "scoped", "scanme.example");
    let scope = daemon.base_dir.join("scoped-scope.yaml");
    std::fs::write(&scope, "targets:\n  - 10.0.0.0/24\n").unwrap();

    let engagement_id = start_engagement(&mut client, &config).await;
    // Let the agent gather at least one finding before stopping.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    client
        .expect_ok(
            Command::EngagementStop,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();

    let store = CheckpointStore::new(&daemon.base_dir);
    let path = store.checkpoint_path(&engagement_id);
    assert!(store.verify(&path));

    // Same scope content: loads.
    let data = store.load(&path, Some(&scope), true).unwrap();
    assert_eq!(data.engagement_id, engagement_id);
    let original_findings = data.findings.len();
    let original_agents = data.agents.len();
    assert_eq!(original_agents, 1);

    // Rewritten scope: refused.
    std::fs::write(&scope, "targets:\n  - 192.168.0.0/16\n").unwrap();
    let err = store.load(&path, Some(&scope), true).unwrap_err();
    assert!(matches!(err, CheckpointError::ScopeChanged));

    // Explicit opt-out still returns the original agents and findings.
    let data = store.load(&path, Some(&scope), false).unwrap();
    assert_eq!(data.agents.len(), original_agents);
    assert_eq!(data.findings.len(), original_findings);
}

/// Stopping twice is rejected, and the daemon's checkpoint list only ever
/// holds one entry per engagement.
#[tokio::test]
async fn stop_is_not_idempotent_and_checkpoints_once() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let config = engagement_config(&daemon, "once", "scanme.example");
    let engagement_id = start_engagement(&mut client, &config).await;

    client
        .expect_ok(
            Command::EngagementStop,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();

    let response = client
        .request(
            Command::EngagementStop,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();
    assert_eq!(response.status, "error");
    assert!(response.error.unwrap().starts_with("Invalid state transition"));

    let store = CheckpointStore::new(&daemon.base_dir);
    assert_eq!(store.list().len(), 1);
}

/// Pause twice fails as well; pause/resume is a strict toggle.
#[tokio::test]
async fn pause_is_not_idempotent() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let config = engagement_config(&daemon, "toggle", "scanme.example");
    let engagement_id = start_engagement(&mut client, &config).await;

    client
        .expect_ok(
            Command::EngagementPause,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();
    let response = client
        .request(
            Command::EngagementPause,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();
    assert!(response.error.unwrap().starts_with("Invalid state transition"));

    client
        .expect_ok(
            Command::EngagementResume,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();
}

//! Daemon specs: streaming attach, the engagement limit, and graceful
//! shutdown over the wire.

use super::prelude::*;

/// Streaming attach: initial state_change snapshot, then agent status and
/// the critical finding from the nuclei fixture, in that order.
#[tokio::test]
async fn streaming_attach_delivers_ordered_events() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let config = engagement_config(&daemon, "stream", "scanme.example");
    let engagement_id = start_engagement(&mut client, &config).await;

    let mut streamer = connect(&daemon).await;
    let (snapshot, subscription_id) = streamer.attach(&engagement_id).await.unwrap();
    assert_eq!(snapshot["state"], "RUNNING");
    assert!(subscription_id.starts_with("sub-"));

    let mut first_state_change = None;
    let mut first_agent_status = None;
    let mut first_finding = None;
    for index in 0..200 {
        let event = match streamer.next_event().await {
            Ok(event) => event,
            Err(_) => break,
        };
        match event.event_type {
            StreamEventType::StateChange if first_state_change.is_none() => {
                first_state_change = Some(index);
            }
            StreamEventType::AgentStatus if first_agent_status.is_none() => {
                first_agent_status = Some(index);
            }
            StreamEventType::Finding if first_finding.is_none() => {
                first_finding = Some(index);
            }
            _ => {}
        }
        if first_finding.is_some() {
            break;
        }
    }

    let state_change = first_state_change.expect("no state_change event");
    let agent_status = first_agent_status.expect("no agent_status event");
    let finding = first_finding.expect("no finding event");
    assert!(state_change < agent_status, "snapshot must precede agent status");
    assert!(agent_status < finding, "agent status must precede the finding");

    assert!(streamer.detach(&engagement_id).await.unwrap());
}

/// With max_active = 2, the third engagement.start reports the resource
/// limit and the first two stay RUNNING.
#[tokio::test]
async fn multi_engagement_limit() {
    let daemon = boot_daemon(2).await;
    let mut client = connect(&daemon).await;

    let first = start_engagement(
        &mut client,
        &engagement_config(&daemon, "one", "scanme.example"),
    )
    .await;
    let second = start_engagement(
        &mut client,
        &engagement_config(&daemon, "two", "10.0.0.5"),
    )
    .await;

    let third_config = engagement_config(&daemon, "three", "10.0.0.6");
    let response = client
        .request(
            Command::EngagementStart,
            serde_json::json!({"config": third_config.to_string_lossy(), "accept_warnings": true}),
        )
        .await
        .unwrap();
    assert_eq!(response.status, "error");
    assert!(response.error.unwrap().contains("Maximum active engagements"));

    let data = client.expect_ok(Command::SessionsList, serde_json::json!({})).await.unwrap();
    let sessions = data["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    for session in sessions {
        assert_eq!(session["state"], "RUNNING");
        let id = session["engagement_id"].as_str().unwrap();
        assert!(id == first || id == second);
    }
}

/// daemon.stop drains every engagement to STOPPED, preserves findings in
/// checkpoints, and notifies attached clients before closing streams.
#[tokio::test]
async fn daemon_stop_shuts_down_gracefully() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let config = engagement_config(&daemon, "drain", "scanme.example");
    let engagement_id = start_engagement(&mut client, &config).await;

    let mut streamer = connect(&daemon).await;
    streamer.attach(&engagement_id).await.unwrap();
    // Give the agent time to emit the fixture-backed finding.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    let data = client.expect_ok(Command::DaemonStop, serde_json::json!({})).await.unwrap();
    let errors = data["engagements"].as_object().unwrap();
    assert!(errors[engagement_id.as_str()].as_array().unwrap().is_empty());

    // The attached client saw daemon_shutdown before its stream closed.
    let mut saw_shutdown = false;
    for _ in 0..200 {
        match streamer.next_event().await {
            Ok(event) => {
                if event.event_type == StreamEventType::DaemonShutdown {
                    saw_shutdown = true;
                    break;
                }
            }
            Err(_) => break,
        }
    }
    assert!(saw_shutdown, "client must see daemon_shutdown");

    // Findings survived into the checkpoint.
    let store = opfor_storage::CheckpointStore::new(&daemon.base_dir);
    let checkpoint = store
        .load(&store.checkpoint_path(&engagement_id), None, false)
        .unwrap();
    assert!(
        !checkpoint.findings.is_empty(),
        "graceful shutdown must preserve 100% of findings"
    );
    assert_eq!(*daemon.ctx.exit_code.lock(), 0);
}

/// Unknown engagement ids produce the stable not-found error over IPC.
#[tokio::test]
async fn not_found_error_over_ipc() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let response = client
        .request(
            Command::EngagementAttach,
            serde_json::json!({"engagement_id": "eng-missing"}),
        )
        .await
        .unwrap();
    assert!(response.error.unwrap().starts_with("Engagement not found"));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket-level tests for the control-plane listener.

use super::*;
use std::path::PathBuf;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader as TokioBufReader};

use opfor_adapters::{Decision, FakeReasoner, FakeToolAdapter, ToolAdapter};
use opfor_bus::{EventBus, MemoryBroker};
use opfor_core::KeyStore;
use opfor_engine::AttackAgentConfig;
use opfor_sandbox::{FixtureStore, SandboxPool};
use opfor_storage::CheckpointStore;

use crate::preflight::PreflightRunner;
use crate::protocol::write_message;
use crate::sessions::{SessionDeps, SessionManager, SessionManagerConfig};

struct Daemon {
    socket: PathBuf,
    ctx: Arc<ListenCtx>,
    _dir: tempfile::TempDir,
    _task: JoinHandle<()>,
}

async fn start_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new(MemoryBroker::new());
    let manager = SessionManager::new(
        SessionManagerConfig {
            base_dir: dir.path().to_path_buf(),
            max_active: 2,
            agent: AttackAgentConfig {
                max_iterations: 3,
                iteration_pause: Duration::from_millis(1),
            },
        },
        SessionDeps {
            bus,
            pool: SandboxPool::mock(Arc::new(FixtureStore::empty())),
            reasoner: Arc::new(FakeReasoner::new([Decision::Complete])),
            adapters: vec![
                Arc::new(FakeToolAdapter::succeeding("nmap", vec![])) as Arc<dyn ToolAdapter>
            ],
            checkpoints: CheckpointStore::new(dir.path()),
            keys: KeyStore::new(dir.path()),
            preflight: PreflightRunner::new(vec![]),
            reaper: None,
        },
    );

    let ctx = Arc::new(ListenCtx {
        manager,
        shutdown: Arc::new(Notify::new()),
        drain_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        exit_code: Mutex::new(0),
    });

    let socket = dir.path().join("daemon.sock");
    let unix = UnixListener::bind(&socket).unwrap();
    let task = tokio::spawn(Listener::new(unix, Arc::clone(&ctx)).run());

    Daemon { socket, ctx, _dir: dir, _task: task }
}

async fn connect(daemon: &Daemon) -> (TokioBufReader<tokio::net::unix::OwnedReadHalf>, tokio::net::unix::OwnedWriteHalf)
{
    let stream = UnixStream::connect(&daemon.socket).await.unwrap();
    let (read, write) = stream.into_split();
    (TokioBufReader::new(read), write)
}

async fn roundtrip(daemon: &Daemon, request: &Request) -> Response {
    let (mut reader, mut writer) = connect(daemon).await;
    write_message(&mut writer, request, Duration::from_secs(1)).await.unwrap();
    read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap()
}

fn engagement_config(daemon: &Daemon) -> PathBuf {
    let path = daemon._dir.path().join("e.yaml");
    std::fs::write(&path, "target: scanme.example\n").unwrap();
    path
}

#[tokio::test]
async fn unknown_command_is_a_protocol_error() {
    let daemon = start_daemon().await;
    let response = roundtrip(
        &daemon,
        &Request::new("engagement.restart", json!({})),
    )
    .await;
    assert_eq!(response.status, "error");
    assert!(response.error.unwrap().starts_with("Protocol error: unknown command"));
}

#[tokio::test]
async fn malformed_json_keeps_connection_alive() {
    let daemon = start_daemon().await;
    let (mut reader, mut writer) = connect(&daemon).await;

    writer.write_all(b"{not json}\n").await.unwrap();
    let response: Response =
        read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
    assert!(response.error.unwrap().starts_with("Protocol error"));

    // Same connection still serves requests.
    let request = Request::new("sessions.list", json!({}));
    write_message(&mut writer, &request, Duration::from_secs(1)).await.unwrap();
    let response: Response =
        read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.request_id, request.request_id);
}

#[tokio::test]
async fn missing_parameter_error_is_stable() {
    let daemon = start_daemon().await;
    let response = roundtrip(&daemon, &Request::new("engagement.start", json!({}))).await;
    assert_eq!(
        response.error.as_deref(),
        Some("Missing required parameter: config")
    );
}

#[tokio::test]
async fn engagement_not_found_error_is_stable() {
    let daemon = start_daemon().await;
    let response = roundtrip(
        &daemon,
        &Request::new("engagement.pause", json!({"engagement_id": "eng-nope"})),
    )
    .await;
    assert!(response.error.unwrap().starts_with("Engagement not found"));
}

#[tokio::test]
async fn start_then_list_shows_running_engagement() {
    let daemon = start_daemon().await;
    let config = engagement_config(&daemon);

    let response = roundtrip(
        &daemon,
        &Request::new("engagement.start", json!({"config": config})),
    )
    .await;
    assert!(response.is_ok(), "{:?}", response.error);
    let engagement_id =
        response.data.unwrap()["engagement_id"].as_str().unwrap().to_string();

    let listed = roundtrip(&daemon, &Request::new("sessions.list", json!({}))).await;
    let sessions = listed.data.unwrap()["sessions"].as_array().unwrap().clone();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["engagement_id"], Value::String(engagement_id));
    assert_eq!(sessions[0]["state"], "RUNNING");
}

#[tokio::test]
async fn third_engagement_hits_the_limit() {
    let daemon = start_daemon().await;
    let config = engagement_config(&daemon);

    for _ in 0..2 {
        let response = roundtrip(
            &daemon,
            &Request::new("engagement.start", json!({"config": config})),
        )
        .await;
        assert!(response.is_ok());
    }
    let response = roundtrip(
        &daemon,
        &Request::new("engagement.start", json!({"config": config})),
    )
    .await;
    assert!(response.error.unwrap().contains("Maximum active engagements"));
}

#[tokio::test]
async fn attach_streams_snapshot_then_events() {
    let daemon = start_daemon().await;
    let config = engagement_config(&daemon);
    let started = roundtrip(
        &daemon,
        &Request::new("engagement.start", json!({"config": config})),
    )
    .await;
    let engagement_id =
        started.data.unwrap()["engagement_id"].as_str().unwrap().to_string();

    let (mut reader, mut writer) = connect(&daemon).await;
    let attach = Request::new("engagement.attach", json!({"engagement_id": engagement_id}));
    write_message(&mut writer, &attach, Duration::from_secs(1)).await.unwrap();

    let response: Response =
        read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
    assert!(response.is_ok());
    let data = response.data.unwrap();
    assert!(data["subscription_id"].as_str().unwrap().starts_with("sub-"));
    assert_eq!(data["snapshot"]["state"], "RUNNING");

    // The first streamed event is the state_change snapshot.
    let event: StreamEvent =
        read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(event.event_type, StreamEventType::StateChange);

    // Heartbeats arrive on the same connection.
    let mut saw_heartbeat = false;
    for _ in 0..5 {
        let event: StreamEvent =
            read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
        if event.event_type == StreamEventType::Heartbeat {
            saw_heartbeat = true;
            break;
        }
    }
    assert!(saw_heartbeat);

    // Detach stops the stream and responds on the same connection.
    let detach = Request::new("engagement.detach", json!({"engagement_id": engagement_id}));
    write_message(&mut writer, &detach, Duration::from_secs(1)).await.unwrap();
    loop {
        let value: Value =
            read_message(&mut reader, Some(Duration::from_secs(2))).await.unwrap();
        if value.get("status").is_some() {
            let response: Response = serde_json::from_value(value).unwrap();
            assert!(response.is_ok());
            assert_eq!(response.data.unwrap()["detached"], true);
            break;
        }
    }
}

#[tokio::test]
async fn daemon_stop_drains_and_sets_exit_code() {
    let daemon = start_daemon().await;
    let config = engagement_config(&daemon);
    roundtrip(&daemon, &Request::new("engagement.start", json!({"config": config}))).await;

    let response = roundtrip(&daemon, &Request::new("daemon.stop", json!({}))).await;
    assert!(response.is_ok());
    assert_eq!(*daemon.ctx.exit_code.lock(), 0);

    // Engagements were checkpointed and stopped.
    let listed = daemon.ctx.manager.list();
    assert!(listed.iter().all(|s| s.state == "STOPPED"));
}

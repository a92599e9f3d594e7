//! Shared fixtures for the end-to-end specs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opfor_daemon::lifecycle::{startup, Config, StartupResult};
use opfor_daemon::listener::Listener;
pub use opfor_daemon::client::DaemonClient;
pub use opfor_daemon::protocol::{Command, StreamEvent, StreamEventType};
use opfor_engine::AttackAgentConfig;

pub const NMAP_FIXTURE: &str = "\
PORT     STATE SERVICE\n\
22/tcp   open  ssh\n\
80/tcp   open  http\n";

pub const NUCLEI_FIXTURE: &str = concat!(
    r#"{"template-id":"cve-2024-0001-rce","info":{"name":"Remote code execution","severity":"critical"}}"#,
    "\n",
);

/// A live daemon in a temp directory.
pub struct TestDaemon {
    pub socket: PathBuf,
    pub base_dir: PathBuf,
    _dir: tempfile::TempDir,
    _listener_task: tokio::task::JoinHandle<()>,
    pub ctx: Arc<opfor_daemon::listener::ListenCtx>,
    pub pool: opfor_sandbox::SandboxPool,
}

/// Boot a daemon with fixture-backed mock sandboxes and fast agent pacing.
pub async fn boot_daemon(max_active: usize) -> TestDaemon {
    let dir = tempfile::tempdir().unwrap();
    let fixtures_dir = dir.path().join("fixtures");
    std::fs::create_dir_all(&fixtures_dir).unwrap();
    std::fs::write(fixtures_dir.join("nmap.txt"), NMAP_FIXTURE).unwrap();
    std::fs::write(fixtures_dir.join("nuclei.txt"), NUCLEI_FIXTURE).unwrap();

    let config = Config {
        base_dir: dir.path().to_path_buf(),
        max_active,
        pool_size: 2,
        fixtures_dir: Some(fixtures_dir),
        real_sandboxes: false,
        drain_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(200),
        agent: AttackAgentConfig {
            max_iterations: 6,
            iteration_pause: Duration::from_millis(100),
        },
    };

    let StartupResult { listener, ctx, pool, _lock } = startup(&config).await.unwrap();
    // The lock lives as long as the temp dir; leak it into the daemon's
    // lifetime for the test.
    std::mem::forget(_lock);
    let listener_task = tokio::spawn(Listener::new(listener, Arc::clone(&ctx)).run());

    TestDaemon {
        socket: config.socket_path(),
        base_dir: dir.path().to_path_buf(),
        _dir: dir,
        _listener_task: listener_task,
        ctx,
        pool,
    }
}

pub async fn connect(daemon: &TestDaemon) -> DaemonClient {
    DaemonClient::connect_with_heartbeat(&daemon.socket, Duration::from_millis(200))
        .await
        .unwrap()
}

/// Write an engagement config (and its scope file) into the daemon dir.
pub fn engagement_config(daemon: &TestDaemon, name: &str, target: &str) -> PathBuf {
    let scope = daemon.base_dir.join(format!("{name}-scope.yaml"));
    std::fs::write(&scope, format!("targets:\n  - {target}\n")).unwrap();
    let path = daemon.base_dir.join(format!("{name}.yaml"));
    std::fs::write(
        &path,
        format!("target: {target}\nscope: {}\n", scope.display()),
    )
    .unwrap();
    path
}

/// Start an engagement and return its id.
pub async fn start_engagement(
    client: &mut DaemonClient,
    config_path: &std::path::Path,
) -> String {
    let data = client
        .expect_ok(
            Command::EngagementStart,
            serde_json::json!({
                "config": config_path.to_string_lossy(),
                // Environment-dependent P1 checks (disk, RAM) must not
                // flake the suite.
                "accept_warnings": true,
            }),
        )
        .await
        .unwrap();
    data["engagement_id"].as_str().unwrap().to_string()
}

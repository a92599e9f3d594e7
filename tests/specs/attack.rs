//! Attack-loop specs: quick attack and the tri-path emergency halt.

use super::prelude::*;

use std::sync::Arc;
use std::time::Duration;

use opfor_adapters::{Decision, FakeReasoner, FakeToolAdapter, ToolAdapter};
use opfor_bus::{EventBus, MemoryBroker};
use opfor_core::{AgentId, Finding, Severity};
use opfor_engine::{AttackAgent, AttackAgentConfig, HaltSwitch, ToolOrchestrator};
use opfor_sandbox::{FakeReaper, FixtureStore, ReapOutcome, SandboxPool};

/// Quick attack happy path: two tool results, at least one success, and
/// the engagement stays RUNNING until stopped.
#[tokio::test]
async fn quick_attack_happy_path() {
    let daemon = boot_daemon(4).await;
    let mut client = connect(&daemon).await;
    let config = engagement_config(&daemon, "quick", "scanme.example");
    let engagement_id = start_engagement(&mut client, &config).await;

    // The engagement runs; drive a quick attack through the same pool.
    let bus = EventBus::new(MemoryBroker::new());
    let orchestrator = ToolOrchestrator::new(
        daemon.pool.clone(),
        bus.clone(),
        opfor_adapters::builtin_adapters(&daemon.pool),
    );
    let halt = Arc::new(HaltSwitch::new(&engagement_id).with_signal_fn(Arc::new(|| Ok(()))));
    let agent = AttackAgent::new(AgentId::new(), Arc::new(FakeReasoner::new([])), orchestrator, bus, halt);

    let results = agent.quick_attack("scanme.example").await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.success));

    // Still RUNNING until an explicit stop.
    let data = client
        .expect_ok(Command::SessionsList, serde_json::json!({}))
        .await
        .unwrap();
    let sessions = data["sessions"].as_array().unwrap();
    assert_eq!(sessions[0]["state"], "RUNNING");

    client
        .expect_ok(
            Command::EngagementStop,
            serde_json::json!({"engagement_id": engagement_id}),
        )
        .await
        .unwrap();
}

/// Emergency halt under load: the agent observes the frozen flag within
/// one iteration, the trigger completes inside its 1s budget, and all
/// three path outcomes are reported.
#[tokio::test]
async fn emergency_halt_under_load() {
    let bus = EventBus::new(MemoryBroker::new());
    let pool = SandboxPool::mock(Arc::new(FixtureStore::empty()));

    // A tool that takes its time, so the halt lands mid-run.
    let slow = Arc::new(
        FakeToolAdapter::succeeding("nmap", vec![])
            .with_delay(Duration::from_millis(400)),
    ) as Arc<dyn ToolAdapter>;
    let orchestrator = ToolOrchestrator::new(pool, bus.clone(), vec![slow]);

    let reaper = Arc::new(FakeReaper::new(ReapOutcome { stopped: 1, ..Default::default() }));
    let halt = Arc::new(
        HaltSwitch::new("eng-halt")
            .with_bus(bus.clone())
            .with_reaper(reaper)
            .with_signal_fn(Arc::new(|| Ok(()))),
    );

    let agent = AttackAgent::new(
        AgentId::new(),
        Arc::new(FakeReasoner::always("nmap")),
        orchestrator,
        bus,
        Arc::clone(&halt),
    )
    .with_config(AttackAgentConfig {
        max_iterations: 50,
        iteration_pause: Duration::from_millis(10),
    });

    let engage = tokio::spawn(async move { agent.engage("scanme.example").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = halt.trigger("op stop", "operator").await;
    assert!(outcome.success);
    assert!(outcome.duration_ms <= 1000, "halt took {}ms", outcome.duration_ms);
    // All three paths report booleans.
    assert!(outcome.paths.broadcast);
    assert!(outcome.paths.signal);
    assert!(outcome.paths.sandbox);

    let report = engage.await.unwrap();
    assert!(report.halted, "agent must observe the frozen flag");
    assert!(report.iterations < 50, "agent must stop within one iteration of the halt");
}

/// The agent stamps itself into findings and pushes actionable ones to
/// the brain channel while the engagement streams to clients.
#[tokio::test]
async fn agent_findings_carry_agent_identity() {
    let bus = EventBus::new(MemoryBroker::new());
    let pool = SandboxPool::mock(Arc::new(FixtureStore::empty()));
    let finding = Finding::new(
        "vulnerability",
        Severity::Critical,
        "rce",
        "scanme.example",
        "",
        "",
        "nuclei",
        "findings:00000000:vulnerability",
    )
    .unwrap();
    let nuclei = Arc::new(FakeToolAdapter::succeeding("nuclei", vec![finding]))
        as Arc<dyn ToolAdapter>;
    let orchestrator = ToolOrchestrator::new(pool, bus.clone(), vec![nuclei]);
    let halt = Arc::new(HaltSwitch::new("eng-1").with_signal_fn(Arc::new(|| Ok(()))));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe("findings:*", move |_channel, payload| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push(payload);
            Ok(())
        }
    })
    .await
    .unwrap();

    let agent = AttackAgent::new(
        AgentId::from_string("agt-spec"),
        Arc::new(FakeReasoner::new([
            Decision::Command { command: "nuclei".to_string() },
            Decision::Complete,
        ])),
        orchestrator,
        bus,
        halt,
    )
    .with_config(AttackAgentConfig {
        max_iterations: 3,
        iteration_pause: Duration::from_millis(1),
    });

    agent.engage("scanme.example").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let published = seen.lock();
    assert_eq!(published.len(), 1);
    let decoded: Finding = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(decoded.agent_id, "agt-spec");
}

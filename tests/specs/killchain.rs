//! Kill chain advancement specs.

use std::sync::Arc;

use opfor_adapters::{FakeToolAdapter, ToolAdapter};
use opfor_bus::{EventBus, MemoryBroker};
use opfor_core::{Finding, Phase, Severity};
use opfor_engine::{KillChain, ToolOrchestrator};
use opfor_sandbox::{FixtureStore, SandboxPool};

fn finding(kind: &str, severity: Severity) -> Finding {
    Finding::new(
        kind,
        severity,
        format!("{kind} on target"),
        "10.0.0.5",
        "",
        "agt-1",
        "nuclei",
        "findings:00000000:x",
    )
    .unwrap()
}

fn chain_with(adapters: Vec<Arc<dyn ToolAdapter>>) -> KillChain {
    let bus = EventBus::new(MemoryBroker::new());
    let pool = SandboxPool::mock(Arc::new(FixtureStore::empty()));
    let orchestrator = ToolOrchestrator::new(pool, bus.clone(), adapters);
    KillChain::new("10.0.0.5", orchestrator, bus)
}

/// A high-severity sqli finding in VULNERABILITY advances to EXPLOITATION
/// and the recommendations include sqlmap.
#[tokio::test]
async fn high_sqli_advances_to_exploitation_with_sqlmap() {
    let nuclei = Arc::new(FakeToolAdapter::succeeding(
        "nuclei",
        vec![finding("sqli", Severity::High)],
    )) as Arc<dyn ToolAdapter>;
    let mut chain = chain_with(vec![nuclei]);
    chain.current_phase = Phase::Vulnerability;

    let result = chain.advance().await;

    assert_eq!(result.phase, Phase::Vulnerability);
    assert_eq!(result.next_phase, Phase::Exploitation);
    assert!(
        result.recommended_tools.contains(&"sqlmap".to_string()),
        "{:?}",
        result.recommended_tools
    );
    assert!(result.recommended_tools.len() <= 5);
    assert_eq!(chain.current_phase, Phase::Exploitation);
    assert_eq!(chain.context.vulnerabilities.len(), 1);
}

/// The chain walks recon → enumeration → vulnerability as findings come
/// in, and a shell finding carries it through to post-exploitation.
#[tokio::test]
async fn findings_drive_full_progression() {
    let port_finding = finding("port_scan", Severity::Info).with_detail(serde_json::json!({
        "host": "10.0.0.5",
        "ports": [{"port": 80, "service": "http"}],
    }));
    let nmap =
        Arc::new(FakeToolAdapter::succeeding("nmap", vec![port_finding])) as Arc<dyn ToolAdapter>;
    let nuclei = Arc::new(FakeToolAdapter::succeeding(
        "nuclei",
        vec![finding("rce", Severity::Critical)],
    )) as Arc<dyn ToolAdapter>;
    let sqlmap = Arc::new(FakeToolAdapter::succeeding(
        "sqlmap",
        vec![finding("shell", Severity::Critical)],
    )) as Arc<dyn ToolAdapter>;

    let mut chain = chain_with(vec![nmap, nuclei, sqlmap]);
    let results = chain.run_to_completion(10).await;

    let phases: Vec<Phase> = results.iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Recon,
            Phase::Enumeration,
            Phase::Vulnerability,
            Phase::Exploitation,
            Phase::PostExploit,
            Phase::Exfil,
        ]
    );
    assert_eq!(chain.current_phase, Phase::Complete);
    assert!(!chain.context.shells.is_empty());
    assert_eq!(chain.context.phase_history.len(), 6);
}

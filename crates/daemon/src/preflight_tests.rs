// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration as ChronoDuration;
use opfor_adapters::FakeReasoner;
use opfor_bus::MemoryBroker;

fn config_with_scope(dir: &tempfile::TempDir, yaml: &str) -> PreflightConfig {
    let scope = dir.path().join("scope.yaml");
    std::fs::write(&scope, yaml).unwrap();
    PreflightConfig {
        scope_path: Some(scope),
        storage_path: dir.path().to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn broker_check_reflects_connectivity() {
    let broker = MemoryBroker::new();
    let check = BrokerCheck::new(broker.clone());
    assert_eq!(check.execute(&PreflightConfig::default()).await.status, CheckStatus::Pass);

    broker.set_connected(false);
    let result = check.execute(&PreflightConfig::default()).await;
    assert_eq!(result.status, CheckStatus::Fail);
    assert_eq!(result.priority, CheckPriority::P0);
}

#[tokio::test]
async fn reasoner_check_pings() {
    let reasoner = Arc::new(FakeReasoner::new([]));
    let check = ReasonerCheck::new(reasoner.clone());
    assert_eq!(check.execute(&PreflightConfig::default()).await.status, CheckStatus::Pass);

    reasoner.reachable.store(false, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(check.execute(&PreflightConfig::default()).await.status, CheckStatus::Fail);
}

#[tokio::test]
async fn scope_check_validates_yaml_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let ok = config_with_scope(&dir, "targets:\n  - 10.0.0.0/24\n");
    assert_eq!(ScopeCheck.execute(&ok).await.status, CheckStatus::Pass);

    let empty = config_with_scope(&dir, "");
    assert_eq!(ScopeCheck.execute(&empty).await.status, CheckStatus::Fail);

    let not_mapping = config_with_scope(&dir, "- just\n- a\n- list\n");
    assert_eq!(ScopeCheck.execute(&not_mapping).await.status, CheckStatus::Fail);

    let broken = config_with_scope(&dir, "targets: [unclosed\n");
    assert_eq!(ScopeCheck.execute(&broken).await.status, CheckStatus::Fail);
}

#[tokio::test]
async fn scope_check_fails_on_missing_file() {
    let config = PreflightConfig {
        scope_path: Some(PathBuf::from("/nonexistent/scope.yaml")),
        ..Default::default()
    };
    let result = ScopeCheck.execute(&config).await;
    assert_eq!(result.status, CheckStatus::Fail);
    assert!(result.message.contains("Scope file not found"));
}

#[tokio::test]
async fn disk_check_thresholds() {
    for (free_percent, expected) in [(50u64, CheckStatus::Pass), (5, CheckStatus::Warn)] {
        let check = DiskCheck::with_probe(Arc::new(move |_path| Some((free_percent, 100))));
        let result = check.execute(&PreflightConfig::default()).await;
        assert_eq!(result.status, expected, "{free_percent}% free");
        assert_eq!(result.priority, CheckPriority::P1);
    }
}

#[tokio::test]
async fn memory_check_thresholds() {
    let cases = [
        (8 * 1024 * 1024 * 1024u64, CheckStatus::Pass),
        (512 * 1024 * 1024u64, CheckStatus::Warn),
    ];
    for (available, expected) in cases {
        let check = MemoryCheck::with_probe(Arc::new(move || available));
        assert_eq!(check.execute(&PreflightConfig::default()).await.status, expected);
    }
}

#[tokio::test]
async fn cert_check_skips_when_c2_disabled() {
    let result = CertCheck::new().execute(&PreflightConfig::default()).await;
    assert_eq!(result.status, CheckStatus::Pass);
    assert!(result.message.contains("C2 disabled"));
}

#[tokio::test]
async fn cert_check_enforces_24h_validity() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("c2.pem");
    std::fs::write(&cert, "-----BEGIN CERTIFICATE-----\n").unwrap();
    let base = PreflightConfig {
        c2_enabled: true,
        c2_cert_path: Some(cert),
        ..Default::default()
    };

    let fresh = CertCheck::with_probe(Arc::new(|_| Ok(Utc::now() + ChronoDuration::days(30))));
    assert_eq!(fresh.execute(&base).await.status, CheckStatus::Pass);

    let expiring = CertCheck::with_probe(Arc::new(|_| Ok(Utc::now() + ChronoDuration::hours(6))));
    let result = expiring.execute(&base).await;
    assert_eq!(result.status, CheckStatus::Fail);
    assert!(result.message.contains("min 24h"));

    let expired = CertCheck::with_probe(Arc::new(|_| Ok(Utc::now() - ChronoDuration::hours(1))));
    assert_eq!(expired.execute(&base).await.status, CheckStatus::Fail);
}

#[tokio::test]
async fn cert_check_fails_when_enabled_but_missing() {
    let config = PreflightConfig { c2_enabled: true, ..Default::default() };
    let result = CertCheck::new().execute(&config).await;
    assert_eq!(result.status, CheckStatus::Fail);
    assert!(result.message.contains("missing"));
}

#[tokio::test]
async fn runner_orders_p0_before_p1() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_scope(&dir, "targets:\n  - 10.0.0.0/24\n");
    let runner = PreflightRunner::new(vec![
        Box::new(DiskCheck::with_probe(Arc::new(|_| Some((50, 100))))),
        Box::new(ScopeCheck),
        Box::new(MemoryCheck::with_probe(Arc::new(|| u64::MAX))),
        Box::new(BrokerCheck::new(MemoryBroker::new())),
    ]);

    let results = runner.run_all(&config).await;
    let priorities: Vec<CheckPriority> = results.iter().map(|r| r.priority).collect();
    assert_eq!(
        priorities,
        vec![CheckPriority::P0, CheckPriority::P0, CheckPriority::P1, CheckPriority::P1]
    );
}

#[tokio::test]
async fn validate_raises_on_p0_fail_regardless_of_acknowledgment() {
    let runner = PreflightRunner::new(vec![]);
    let results = vec![
        CheckResult::new("SCOPE_CHECK", CheckStatus::Fail, CheckPriority::P0, "missing"),
        CheckResult::new("DISK_CHECK", CheckStatus::Warn, CheckPriority::P1, "low"),
    ];
    assert!(matches!(
        runner.validate(&results, false),
        Err(PreflightError::Blocking(ref blocked)) if blocked.len() == 1
    ));
    assert!(matches!(runner.validate(&results, true), Err(PreflightError::Blocking(_))));
}

#[tokio::test]
async fn validate_warning_semantics() {
    let runner = PreflightRunner::new(vec![]);
    let results = vec![
        CheckResult::new("BROKER_CHECK", CheckStatus::Pass, CheckPriority::P0, "ok"),
        CheckResult::new("DISK_CHECK", CheckStatus::Warn, CheckPriority::P1, "low"),
    ];
    assert!(matches!(runner.validate(&results, false), Err(PreflightError::Warnings(_))));
    assert!(runner.validate(&results, true).is_ok());

    let clean = vec![CheckResult::new("BROKER_CHECK", CheckStatus::Pass, CheckPriority::P0, "ok")];
    assert!(runner.validate(&clean, false).is_ok());
}

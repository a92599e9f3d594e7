// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;

const ALL_STATES: [EngagementState; 5] = [
    EngagementState::Initializing,
    EngagementState::Running,
    EngagementState::Paused,
    EngagementState::Stopped,
    EngagementState::Completed,
];

#[test]
fn exactly_six_legal_edges() {
    assert_eq!(VALID_TRANSITIONS.len(), 6);
    let legal: usize = ALL_STATES
        .iter()
        .map(|&from| ALL_STATES.iter().filter(|&&to| is_valid_transition(from, to)).count())
        .sum();
    assert_eq!(legal, 6);
}

#[yare::parameterized(
    init_to_run    = { EngagementState::Initializing, EngagementState::Running },
    run_to_pause   = { EngagementState::Running, EngagementState::Paused },
    pause_to_run   = { EngagementState::Paused, EngagementState::Running },
    run_to_stop    = { EngagementState::Running, EngagementState::Stopped },
    pause_to_stop  = { EngagementState::Paused, EngagementState::Stopped },
    stop_to_done   = { EngagementState::Stopped, EngagementState::Completed },
)]
fn legal_edges(from: EngagementState, to: EngagementState) {
    assert!(is_valid_transition(from, to));
}

#[test]
fn self_transitions_are_illegal() {
    for state in ALL_STATES {
        assert!(!is_valid_transition(state, state));
    }
}

#[test]
fn completed_is_terminal() {
    assert!(valid_targets(EngagementState::Completed).is_empty());
}

#[test]
fn valid_targets_per_state() {
    assert_eq!(valid_targets(EngagementState::Initializing), vec![EngagementState::Running]);
    assert_eq!(
        valid_targets(EngagementState::Running),
        vec![EngagementState::Paused, EngagementState::Stopped]
    );
    assert_eq!(
        valid_targets(EngagementState::Paused),
        vec![EngagementState::Running, EngagementState::Stopped]
    );
    assert_eq!(valid_targets(EngagementState::Stopped), vec![EngagementState::Completed]);
}

#[test]
fn starts_initializing_with_history_entry() {
    let machine = EngagementStateMachine::new("eng-1");
    assert_eq!(machine.current_state(), EngagementState::Initializing);
    let history = machine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].0, EngagementState::Initializing);
    assert!((Utc::now() - history[0].1).num_seconds() < 1);
}

#[test]
fn invalid_transition_leaves_state_and_history_untouched() {
    let machine = EngagementStateMachine::new("eng-1");
    let err = machine.transition(EngagementState::Paused).unwrap_err();
    assert_eq!(err.engagement_id, "eng-1");
    assert_eq!(err.from, EngagementState::Initializing);
    assert_eq!(err.to, EngagementState::Paused);
    assert_eq!(machine.current_state(), EngagementState::Initializing);
    assert_eq!(machine.history().len(), 1);
}

#[test]
fn error_text_carries_the_stable_prefix() {
    let machine = EngagementStateMachine::new("eng-1");
    let err = machine.transition(EngagementState::Completed).unwrap_err();
    assert!(err.to_string().starts_with("Invalid state transition"));
}

#[test]
fn full_lifecycle_is_recorded() {
    let machine = EngagementStateMachine::new("eng-1");
    machine.start().unwrap();
    machine.pause().unwrap();
    machine.resume().unwrap();
    machine.stop().unwrap();
    machine.complete().unwrap();

    let states: Vec<EngagementState> = machine.history().iter().map(|(s, _)| *s).collect();
    assert_eq!(
        states,
        vec![
            EngagementState::Initializing,
            EngagementState::Running,
            EngagementState::Paused,
            EngagementState::Running,
            EngagementState::Stopped,
            EngagementState::Completed,
        ]
    );

    let times: Vec<_> = machine.history().iter().map(|(_, t)| *t).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[yare::parameterized(
    double_start  = { &[EngagementState::Running], EngagementState::Running },
    pause_fresh   = { &[], EngagementState::Paused },
    double_pause  = { &[EngagementState::Running, EngagementState::Paused], EngagementState::Paused },
    double_stop   = { &[EngagementState::Running, EngagementState::Stopped], EngagementState::Stopped },
    early_done    = { &[EngagementState::Running], EngagementState::Completed },
)]
fn convenience_paths_reject_wrong_states(setup: &[EngagementState], bad: EngagementState) {
    let machine = EngagementStateMachine::new("eng-1");
    for &state in setup {
        machine.transition(state).unwrap();
    }
    assert!(machine.transition(bad).is_err());
}

#[tokio::test]
async fn observers_see_transitions() {
    let machine = EngagementStateMachine::new("eng-1");
    let seen: Arc<parking_lot::Mutex<Vec<(EngagementState, EngagementState)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    machine.observe(move |from, to| sink.lock().push((from, to)));

    machine.start().unwrap();
    machine.pause().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(
        seen.lock().as_slice(),
        &[
            (EngagementState::Initializing, EngagementState::Running),
            (EngagementState::Running, EngagementState::Paused),
        ]
    );
}

#[tokio::test]
async fn panicking_observer_does_not_block_transitions() {
    let machine = EngagementStateMachine::new("eng-1");
    machine.observe(|_, _| panic!("observer exploded"));
    let seen: Arc<parking_lot::Mutex<u32>> = Arc::new(parking_lot::Mutex::new(0));
    let sink = Arc::clone(&seen);
    machine.observe(move |_, _| *sink.lock() += 1);

    machine.start().unwrap();
    machine.pause().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(machine.current_state(), EngagementState::Paused);
    assert_eq!(*seen.lock(), 2);
}

#[test]
fn states_serialize_uppercase() {
    assert_eq!(
        serde_json::to_string(&EngagementState::Initializing).unwrap(),
        "\"INITIALIZING\""
    );
    let back: EngagementState = serde_json::from_str("\"PAUSED\"").unwrap();
    assert_eq!(back, EngagementState::Paused);
}

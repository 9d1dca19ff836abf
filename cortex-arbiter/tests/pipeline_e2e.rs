//! End-to-end: signal → need → dispatch → sanitize → reduce → gate.
//!
//! Given/When/Then narration with real collaborators throughout.

mod common;

use common::{build, pump, AuthorityMode, Speaker};
use cortex_bus::TelemetryKind;
use cortex_core::{CortexConfig, Signal, SignalKind, Tier};
use std::time::Duration;

#[tokio::test]
async fn explicit_goal_with_healthy_authority_becomes_task() {
    // Given: a healthy authority and a module that utters an explicit goal.
    let (mut arbiter, bus, authority) = build(CortexConfig::default(), AuthorityMode::Healthy);
    arbiter
        .register_module(std::sync::Arc::new(Speaker {
            id: "tree-spotter",
            tier: Tier::Reactive,
            kind: SignalKind::Hunger,
            text: "I see trees nearby. [GOAL: craft wooden_planks]",
        }))
        .unwrap();
    let mut tasks_rx = bus.tasks.take_receiver();

    // When: a hunger signal drives a tick and the reduction completes.
    bus.signals
        .publish(Signal::new(SignalKind::Hunger, 0.9, "test-feed"))
        .await
        .unwrap();
    pump(&mut arbiter, 3).await;

    // Then: exactly the gated task came out.
    let task = tokio::time::timeout(Duration::from_secs(2), tasks_rx.recv())
        .await
        .expect("task not emitted in time")
        .expect("tasks topic closed");
    assert_eq!(task.source_envelope_id.len(), 16);
    assert_eq!(task.source_module.as_str(), "tree-spotter");
    assert_eq!(
        task.reducer_result["markers"][0],
        "[GOAL: craft wooden_planks]"
    );
    assert!(authority.calls() >= 1);

    // And: telemetry recorded the reduction with a real latency.
    let events = bus.telemetry.drain();
    let reduction = events
        .iter()
        .find_map(|e| match &e.kind {
            TelemetryKind::ReductionResult {
                sterling_processed: true,
                is_executable: true,
                reduce_latency_ms,
                ..
            } => Some(*reduce_latency_ms),
            _ => None,
        })
        .expect("no reduction result event");
    let _ = reduction; // latency is u64, trivially ≥ 0; presence is the assertion
}

#[tokio::test]
async fn natural_language_intent_stays_a_thought() {
    // Given: a healthy authority and a module that merely muses.
    let (mut arbiter, bus, _authority) = build(CortexConfig::default(), AuthorityMode::Healthy);
    arbiter
        .register_module(std::sync::Arc::new(Speaker {
            id: "daydreamer",
            tier: Tier::Hierarchical,
            kind: SignalKind::Curiosity,
            text: "I intend to explore the nearby mountains.",
        }))
        .unwrap();
    let mut tasks_rx = bus.tasks.take_receiver();

    // When: curiosity drives a tick.
    bus.signals
        .publish(Signal::new(SignalKind::Curiosity, 0.95, "test-feed"))
        .await
        .unwrap();
    pump(&mut arbiter, 3).await;

    // Then: no task; the utterance surfaced as a blocked thought.
    assert!(tasks_rx.try_recv().is_err());
    let thoughts = bus.thoughts.drain();
    assert!(!thoughts.is_empty());
    let thought = &thoughts[0];
    assert_eq!(thought.reason, "sterling_not_executable");
    assert!(thought.block_reason.is_some());
    assert!(thought.envelope_id.is_some());
}

#[tokio::test]
async fn explicit_goal_with_unreachable_authority_is_denied() {
    // Given: the authority is down and the circuit trips after 2 failures.
    let config = CortexConfig::default().with_reducer(100, 2, 30_000);
    let (mut arbiter, bus, authority) = build(config, AuthorityMode::Down);
    arbiter
        .register_module(std::sync::Arc::new(Speaker {
            id: "miner",
            tier: Tier::Reactive,
            kind: SignalKind::Hunger,
            text: "[GOAL: mine stone]",
        }))
        .unwrap();
    let mut tasks_rx = bus.tasks.take_receiver();

    // When: the need persists across several ticks.
    bus.signals
        .publish(Signal::new(SignalKind::Hunger, 0.9, "test-feed"))
        .await
        .unwrap();
    pump(&mut arbiter, 5).await;

    // Then: the explicit marker did not help; nothing executable.
    assert!(tasks_rx.try_recv().is_err());
    let thoughts = bus.thoughts.drain();
    assert!(!thoughts.is_empty());
    assert!(thoughts.iter().all(|t| t.reason == "sterling_unavailable"));

    // And: the circuit opened after the configured failures.
    assert!(authority.calls() >= 2);
    let events = bus.telemetry.drain();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        TelemetryKind::CircuitTransition { circuit_state, .. } if circuit_state == "open"
    )));
}

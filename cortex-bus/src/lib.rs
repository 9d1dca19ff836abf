//! # Cortex Bus - Typed Topics and Telemetry
//!
//! Pub/sub plumbing between the core components. Topics are typed channels,
//! not string-routed events; each topic carries a fixed backpressure policy:
//!
//! | Topic | Payload | Policy |
//! |-------|---------|--------|
//! | `signals` | [`cortex_core::Signal`] | bounded blocking (producers slow down) |
//! | `needs` | need snapshots | lossy (observer topic) |
//! | `tasks` | [`TaskRecord`] | bounded blocking |
//! | `thoughts` | [`ThoughtRecord`] | lossy (observer topic) |
//! | `telemetry` | [`TelemetryEvent`] | lossy, drops counted |
//! | `safety` | [`SafetyAlert`] | reliable bounded, overflow is fatal |
//!
//! Producers never depend on consumer acknowledgement for correctness, and
//! there are no topic cycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod records;
pub mod telemetry;
pub mod topic;

pub use records::{SafetyAlert, TaskRecord, ThoughtRecord};
pub use telemetry::{TelemetryEmitter, TelemetryEvent, TelemetryKind};
pub use topic::{BlockingTopic, BusError, LossyTopic, ReliableTopic};

use cortex_core::{CortexConfig, Need, Signal};

/// All topics of the core, constructed together so capacities come from one
/// configuration.
#[derive(Debug)]
pub struct CortexBus {
    /// Raw homeostatic signals from external producers.
    pub signals: BlockingTopic<Signal>,
    /// Per-tick need snapshots for observers.
    pub needs: LossyTopic<Vec<Need>>,
    /// Executable tasks for the execution collaborator.
    pub tasks: BlockingTopic<TaskRecord>,
    /// Blocked thoughts for the memory collaborator.
    pub thoughts: LossyTopic<ThoughtRecord>,
    /// Structured telemetry events.
    pub telemetry: LossyTopic<TelemetryEvent>,
    /// Safety alerts. Overflow here is a fatal condition.
    pub safety: ReliableTopic<SafetyAlert>,
}

impl CortexBus {
    /// Build the bus with per-topic capacity from configuration.
    pub fn new(config: &CortexConfig) -> Self {
        let cap = config.telemetry_topic_capacity;
        Self {
            signals: BlockingTopic::named(cap, "signals"),
            needs: LossyTopic::new(cap),
            tasks: BlockingTopic::named(cap, "tasks"),
            thoughts: LossyTopic::new(cap),
            telemetry: LossyTopic::new(cap),
            safety: ReliableTopic::new(cap),
        }
    }
}

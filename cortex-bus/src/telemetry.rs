//! Structured telemetry events.
//!
//! Every noteworthy transition in the core produces exactly one event here:
//! tick summaries, budget warnings and violations, reduction results,
//! safe-mode and circuit transitions, keep-alive decisions, and invariant
//! violations. Events are serializable, versioned, and carry a correlation
//! id (tick or envelope) plus a one-line human-readable summary.
//!
//! This stream is distinct from the `tracing` log stream: logs are for
//! operators, telemetry events are consumed by external collaborators over
//! the lossy telemetry topic.

use crate::topic::LossyTopic;
use chrono::{DateTime, Utc};
use cortex_core::{BudgetMode, ErrorClass, TickId, TELEMETRY_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryKind {
    /// One scheduling tick completed.
    TickSummary {
        /// Budget mode the tick ran in.
        mode: BudgetMode,
        /// Tier dispatched, if any module ran.
        dispatched_tier: Option<u8>,
        /// Consumed budget in ms.
        consumed_ms: u64,
        /// Whether the tick stayed inside its deadline.
        within_budget: bool,
    },
    /// A module or tick crossed 80% of its budget.
    BudgetWarning {
        /// Module involved, or the tick itself when absent.
        module: Option<String>,
        /// Fraction of budget consumed when the warning fired.
        fraction: f64,
    },
    /// A budget was exceeded.
    BudgetViolation {
        /// Module involved, or the tick itself when absent.
        module: Option<String>,
        /// Consumed ms.
        consumed_ms: u64,
        /// Allowed ms.
        budget_ms: u64,
    },
    /// A semantic reduction finished (successfully or fail-closed).
    ReductionResult {
        /// Whether the authority processed the envelope.
        sterling_processed: bool,
        /// Whether the result is executable.
        is_executable: bool,
        /// Reducer-provided block reason.
        block_reason: Option<String>,
        /// Transport/client error string, when the path failed.
        sterling_error: Option<String>,
        /// Round-trip latency in ms.
        reduce_latency_ms: u64,
    },
    /// Safe mode engaged or released.
    SafeModeTransition {
        /// True on entry, false on exit.
        active: bool,
        /// Why.
        reason: String,
        /// Tiers allowed while active.
        allowed_tiers: Vec<u8>,
    },
    /// Reduction client circuit state changed.
    CircuitTransition {
        /// Previous state name.
        from: String,
        /// New state name.
        circuit_state: String,
    },
    /// A keep-alive intention check ran.
    KeepaliveTick {
        /// Interval that produced this tick, in ms.
        interval_ms: u64,
        /// Ticks used inside the current one-minute window.
        window_count: u32,
    },
    /// A keep-alive tick was skipped because the system was not idle.
    KeepaliveSkipNotIdle {
        /// First idle predicate clause that failed.
        reason: String,
    },
    /// The keep-alive rate limit or an internal check tripped.
    KeepaliveViolation {
        /// What tripped.
        reason: String,
    },
    /// The eligibility self-check failed. Fatal for the tick.
    InvariantViolation {
        /// What the check observed.
        detail: String,
    },
    /// A module finished with a recorded outcome.
    ModuleOutcome {
        /// Module id.
        module: String,
        /// Outcome name (completed/preempted/timed_out/errored).
        outcome: String,
        /// Module latency in ms.
        latency_ms: u64,
    },
    /// A signal was rejected at ingest.
    SignalRejected {
        /// Producer of the rejected signal.
        source: String,
        /// What was wrong.
        detail: String,
    },
}

impl TelemetryKind {
    /// One-line human-readable summary, as required for every error path.
    pub fn summary(&self) -> String {
        match self {
            TelemetryKind::TickSummary {
                mode,
                dispatched_tier,
                consumed_ms,
                within_budget,
            } => format!(
                "tick {:?} dispatched={} consumed={}ms within_budget={}",
                mode,
                dispatched_tier.map_or("none".to_string(), |t| format!("tier{t}")),
                consumed_ms,
                within_budget
            ),
            TelemetryKind::BudgetWarning { module, fraction } => format!(
                "budget warning for {} at {:.0}%",
                module.as_deref().unwrap_or("tick"),
                fraction * 100.0
            ),
            TelemetryKind::BudgetViolation {
                module,
                consumed_ms,
                budget_ms,
            } => format!(
                "budget violation: {} took {}ms of {}ms",
                module.as_deref().unwrap_or("tick"),
                consumed_ms,
                budget_ms
            ),
            TelemetryKind::ReductionResult {
                sterling_processed,
                is_executable,
                sterling_error,
                ..
            } => format!(
                "reduction processed={} executable={} error={}",
                sterling_processed,
                is_executable,
                sterling_error.as_deref().unwrap_or("none")
            ),
            TelemetryKind::SafeModeTransition { active, reason, .. } => {
                format!("safe mode {} ({reason})", if *active { "on" } else { "off" })
            }
            TelemetryKind::CircuitTransition { from, circuit_state } => {
                format!("reducer circuit {from} -> {circuit_state}")
            }
            TelemetryKind::KeepaliveTick { interval_ms, .. } => {
                format!("keep-alive tick after {interval_ms}ms")
            }
            TelemetryKind::KeepaliveSkipNotIdle { reason } => {
                format!("keep-alive skipped: {reason}")
            }
            TelemetryKind::KeepaliveViolation { reason } => {
                format!("keep-alive violation: {reason}")
            }
            TelemetryKind::InvariantViolation { detail } => {
                format!("invariant violation: {detail}")
            }
            TelemetryKind::ModuleOutcome {
                module,
                outcome,
                latency_ms,
            } => format!("module {module} {outcome} in {latency_ms}ms"),
            TelemetryKind::SignalRejected { source, detail } => {
                format!("signal from {source} rejected: {detail}")
            }
        }
    }
}

/// A structured telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    /// Schema version of this event shape.
    pub schema_version: String,
    /// Wall-clock emission time.
    pub at: DateTime<Utc>,
    /// Correlating tick, when the event belongs to one.
    pub tick: Option<TickId>,
    /// Correlating envelope, when the event belongs to a reduction.
    pub envelope_id: Option<String>,
    /// Latency attached to the event, when meaningful.
    pub latency_ms: Option<u64>,
    /// Error classification, when the event is an error.
    pub error_class: Option<ErrorClass>,
    /// Whether the system was degraded (safe mode) when the event fired.
    pub degraded_mode: bool,
    /// The event payload.
    pub kind: TelemetryKind,
    /// One-line human-readable summary.
    pub summary: String,
}

impl TelemetryEvent {
    /// Build an event from its kind, stamping time and schema version.
    pub fn new(kind: TelemetryKind) -> Self {
        let summary = kind.summary();
        Self {
            schema_version: TELEMETRY_SCHEMA_VERSION.to_string(),
            at: Utc::now(),
            tick: None,
            envelope_id: None,
            latency_ms: None,
            error_class: None,
            degraded_mode: false,
            kind,
            summary,
        }
    }

    /// Attach a tick correlation id.
    pub fn with_tick(mut self, tick: TickId) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Attach an envelope correlation id.
    pub fn with_envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    /// Attach a latency.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark the event as an error of the given class.
    pub fn with_error(mut self, class: ErrorClass) -> Self {
        self.error_class = Some(class);
        self
    }

    /// Mark the event as emitted under safe mode.
    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded_mode = degraded;
        self
    }
}

/// Publishes telemetry events onto the lossy telemetry topic and mirrors
/// them to the log stream at debug level.
#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    topic: LossyTopic<TelemetryEvent>,
}

impl TelemetryEmitter {
    /// Create an emitter over the given topic.
    pub fn new(topic: LossyTopic<TelemetryEvent>) -> Self {
        Self { topic }
    }

    /// Emit one event.
    pub fn emit(&self, event: TelemetryEvent) {
        debug!(event = %event.summary, schema = %event.schema_version, "telemetry");
        self.topic.publish(event);
    }

    /// Events dropped by the topic so far.
    pub fn dropped(&self) -> u64 {
        self.topic.dropped()
    }
}

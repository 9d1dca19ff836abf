//! Shared vocabulary for the control core.
//!
//! These types map directly to the data model of the control loop: raw
//! homeostatic signals, derived needs, cognitive tiers, and tick budgets.
//! Candidate utterances are opaque text; nothing here interprets them.

use crate::clock::Deadline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Homeostatic signal kind.
///
/// The enumeration order is the final tie-breaker when two needs have equal
/// urgency, so the ordering of variants is part of the contract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Bodily integrity (damage, low health).
    Health,
    /// Food / fuel level.
    Hunger,
    /// Environmental threat pressure.
    Safety,
    /// Social contact pressure.
    Social,
    /// Fatigue / energy reserves.
    Energy,
    /// Exploration pressure.
    Curiosity,
}

impl SignalKind {
    /// All kinds in tie-break order.
    pub const ALL: [SignalKind; 6] = [
        SignalKind::Health,
        SignalKind::Hunger,
        SignalKind::Safety,
        SignalKind::Social,
        SignalKind::Energy,
        SignalKind::Curiosity,
    ];

    /// Kinds whose needs run the tick in hazardous mode (50 ms budget).
    pub fn is_hazard(&self) -> bool {
        matches!(self, SignalKind::Health | SignalKind::Safety)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Health => "health",
            SignalKind::Hunger => "hunger",
            SignalKind::Safety => "safety",
            SignalKind::Social => "social",
            SignalKind::Energy => "energy",
            SignalKind::Curiosity => "curiosity",
        };
        f.write_str(name)
    }
}

impl FromStr for SignalKind {
    type Err = UnknownSignalKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(SignalKind::Health),
            "hunger" => Ok(SignalKind::Hunger),
            "safety" => Ok(SignalKind::Safety),
            "social" => Ok(SignalKind::Social),
            "energy" => Ok(SignalKind::Energy),
            "curiosity" => Ok(SignalKind::Curiosity),
            other => Err(UnknownSignalKind(other.to_string())),
        }
    }
}

/// A signal kind name the core does not recognize. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignalKind(pub String);

/// A raw homeostatic signal. Immutable once created; produced by external
/// collaborators (perception, health monitors, memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// What the signal is about.
    pub kind: SignalKind,
    /// Raw intensity. The processor clamps to [0,1]; NaN/∞ are rejected.
    pub intensity: f64,
    /// Producer label, carried into evidence.
    pub source: String,
    /// Wall-clock production time. Provenance only, never scheduling input.
    pub at: DateTime<Utc>,
}

impl Signal {
    /// Convenience constructor stamping the current wall-clock time.
    pub fn new(kind: SignalKind, intensity: f64, source: impl Into<String>) -> Self {
        Self {
            kind,
            intensity,
            source: source.into(),
            at: Utc::now(),
        }
    }
}

/// Reference to a contributing signal, carried as need evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRef {
    /// Kind of the contributing signal.
    pub kind: SignalKind,
    /// Normalized intensity at the time it contributed.
    pub intensity: f64,
    /// Producer label.
    pub source: String,
    /// Wall-clock production time.
    pub at: DateTime<Utc>,
}

/// Trend of a signal over its history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Short-window mean above long-window mean.
    Rising,
    /// Means within the stability threshold.
    Stable,
    /// Short-window mean below long-window mean.
    Falling,
}

/// Derived pressure to act. Lifecycle bounded by one arbiter tick.
#[derive(Debug, Clone)]
pub struct Need {
    /// Kind of the underlying signal.
    pub kind: SignalKind,
    /// Urgency in [0,1].
    pub urgency: f64,
    /// Trend of the underlying signal.
    pub trend: Trend,
    /// Monotonic creation time; the second tie-breaker (older wins).
    pub generated_at: Instant,
    /// Signals that produced this need.
    pub evidence: Vec<SignalRef>,
}

/// Perceived threat level, maintained by the safety collaborator and read
/// by the arbiter (mode choice) and the keep-alive idle predicate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// No known threat.
    #[default]
    None,
    /// Distant or weak threat.
    Low,
    /// Threat worth watching.
    Medium,
    /// Active threat.
    High,
    /// Immediate danger.
    Critical,
}

/// Cognitive tier. Lower value preempts higher value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 0: emergency safety responses, ≤ 10 ms.
    Reflex,
    /// Tier 1: reactive planning, ≤ 50 ms.
    Reactive,
    /// Tier 2: hierarchical planning, ≤ 200 ms.
    Hierarchical,
    /// Tier 3: deliberative / LLM-assisted, soft-unbounded, cancellable.
    Deliberative,
}

impl Tier {
    /// All tiers, highest priority first.
    pub const LADDER: [Tier; 4] = [
        Tier::Reflex,
        Tier::Reactive,
        Tier::Hierarchical,
        Tier::Deliberative,
    ];

    /// Numeric index (0 = reflex).
    pub fn index(&self) -> u8 {
        match self {
            Tier::Reflex => 0,
            Tier::Reactive => 1,
            Tier::Hierarchical => 2,
            Tier::Deliberative => 3,
        }
    }

    /// Tier from its numeric index.
    pub fn from_index(index: u8) -> Option<Tier> {
        match index {
            0 => Some(Tier::Reflex),
            1 => Some(Tier::Reactive),
            2 => Some(Tier::Hierarchical),
            3 => Some(Tier::Deliberative),
            _ => None,
        }
    }

    /// Declared latency ceiling; `None` for the soft-unbounded tier.
    pub fn latency_ceiling(&self) -> Option<Duration> {
        match self {
            Tier::Reflex => Some(Duration::from_millis(10)),
            Tier::Reactive => Some(Duration::from_millis(50)),
            Tier::Hierarchical => Some(Duration::from_millis(200)),
            Tier::Deliberative => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.index())
    }
}

/// Tick budget mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Hazard handling: 50 ms target (configurable via `LOOP_TARGET_MS`).
    Hazardous,
    /// Routine operation: 200 ms ceiling (configurable via `LOOP_MAX_MS`).
    Routine,
}

/// One tick's budget: start instant, mode, and the derived deadline.
#[derive(Debug, Clone, Copy)]
pub struct BudgetWindow {
    /// Monotonic tick start.
    pub start: Instant,
    /// Mode the tick runs in.
    pub mode: BudgetMode,
    /// Absolute deadline for the tick.
    pub deadline: Deadline,
}

impl BudgetWindow {
    /// Open a window at `start` with the given budget.
    pub fn open(start: Instant, mode: BudgetMode, budget: Duration) -> Self {
        Self {
            start,
            mode,
            deadline: Deadline::after(start, budget),
        }
    }

    /// Budget consumed so far.
    pub fn consumed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    /// Fraction of the budget consumed, ≥ 0, may exceed 1 on overrun.
    pub fn fraction_consumed(&self, now: Instant) -> f64 {
        let total = self
            .deadline
            .at()
            .saturating_duration_since(self.start)
            .as_secs_f64();
        if total <= 0.0 {
            return 1.0;
        }
        self.consumed(now).as_secs_f64() / total
    }
}

/// Monotonic tick counter value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TickId(pub u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick-{}", self.0)
    }
}

/// Identifier of a registered cognitive module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    /// Create a module id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Raw text produced by a module, before sanitization and reduction.
///
/// Carries no semantic interpretation; marker spans are extracted verbatim
/// later by the sanitizer.
#[derive(Debug, Clone)]
pub struct CandidateUtterance {
    /// Unique id for correlation.
    pub id: Uuid,
    /// Module that produced the text.
    pub source_module: ModuleId,
    /// The raw text.
    pub raw_text: String,
    /// Monotonic production time.
    pub generated_at: Instant,
}

impl CandidateUtterance {
    /// Create an utterance stamped with a fresh id.
    pub fn new(source_module: ModuleId, raw_text: impl Into<String>, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_module,
            raw_text: raw_text.into(),
            generated_at: now,
        }
    }
}

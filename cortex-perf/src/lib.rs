//! # Cortex Perf - Budgets, Latency, Safe Mode
//!
//! Two collaborating components observe every stage of the control loop:
//!
//! - [`PerfMonitor`] (reporting only): bounded latency sample rings per
//!   module, running P50/P95/P99, budget warnings and violations. It never
//!   cancels anything.
//! - [`BudgetEnforcer`] (authoritative): the per-tick state machine
//!   `Fresh → Warn → Preempt`, consecutive-violation counting, and the
//!   single-writer safe-mode state. Cancellation decisions come from here.
//!
//! The [`DegradationManager`] sits between them: when a module's P95 over a
//! rolling window exceeds its declared budget by a configured factor, the
//! module is temporarily kept off hazardous ticks.
//!
//! An optional on-disk latency profile seeds degradation decisions across
//! runs; the core is otherwise stateless between runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod enforcer;
pub mod monitor;
pub mod profile;

pub use enforcer::{BudgetEnforcer, DegradationManager, SafeModeState, TickPhase, TickVerdict};
pub use monitor::{LatencySample, ModuleLatencyStats, PerfMonitor, SampleOutcome};
pub use profile::{LatencyProfile, ProfileEntry, ProfileError};

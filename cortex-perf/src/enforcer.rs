//! Budget enforcement: the per-tick state machine and safe mode.
//!
//! The enforcer is the single writer of safe-mode state; everyone else
//! reads snapshots. The per-tick machine is
//! `Fresh → Warn (≥80% of the mode deadline) → Preempt (≥100%)`, and
//! repeated violations escalate to safe mode:
//! `Off → On (violations ≥ threshold) → Off (clean ticks ≥ recovery)`.

use crate::monitor::{PerfMonitor, WARN_FRACTION};
use crate::profile::LatencyProfile;
use cortex_bus::{TelemetryEmitter, TelemetryEvent, TelemetryKind};
use cortex_core::{BudgetWindow, ErrorClass, ModuleId, TickId, Tier};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Where a tick currently stands against its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Under 80% of the deadline.
    Fresh,
    /// At or past 80%.
    Warn,
    /// Deadline reached: in-flight non-reflex work must be cancelled.
    Preempt,
}

/// Safe-mode state. At most one exists; the enforcer is its only writer.
#[derive(Debug, Clone)]
pub struct SafeModeState {
    /// Whether safe mode is engaged.
    pub active: bool,
    /// Why it engaged.
    pub reason: String,
    /// When it engaged.
    pub entered_at: Option<Instant>,
    /// Tiers that may still be dispatched while engaged.
    pub allowed_tiers: Vec<Tier>,
}

impl Default for SafeModeState {
    fn default() -> Self {
        Self {
            active: false,
            reason: String::new(),
            entered_at: None,
            allowed_tiers: vec![Tier::Reflex, Tier::Reactive],
        }
    }
}

impl SafeModeState {
    /// Whether a tier may be dispatched under the current state.
    pub fn allows(&self, tier: Tier) -> bool {
        !self.active || self.allowed_tiers.contains(&tier)
    }

    fn allowed_indices(&self) -> Vec<u8> {
        self.allowed_tiers.iter().map(|t| t.index()).collect()
    }
}

/// Verdict for one finished tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickVerdict {
    /// The tick stayed inside its deadline.
    pub within_budget: bool,
    /// Safe mode engaged as a result of this tick.
    pub entered_safe_mode: bool,
    /// Safe mode released as a result of this tick.
    pub exited_safe_mode: bool,
}

/// Budget enforcer and safe-mode owner.
#[derive(Debug)]
pub struct BudgetEnforcer {
    threshold: u32,
    recovery: u32,
    consecutive_violations: u32,
    consecutive_clean: u32,
    safe_mode: SafeModeState,
    emitter: TelemetryEmitter,
}

impl BudgetEnforcer {
    /// Create an enforcer with safe-mode entry/exit counters.
    pub fn new(threshold: u32, recovery: u32, emitter: TelemetryEmitter) -> Self {
        Self {
            threshold: threshold.max(1),
            recovery: recovery.max(1),
            consecutive_violations: 0,
            consecutive_clean: 0,
            safe_mode: SafeModeState::default(),
            emitter,
        }
    }

    /// Mid-tick assessment of the window. Pure read.
    pub fn assess(&self, window: &BudgetWindow, now: Instant) -> TickPhase {
        if window.deadline.is_expired(now) {
            TickPhase::Preempt
        } else if window.fraction_consumed(now) >= WARN_FRACTION {
            TickPhase::Warn
        } else {
            TickPhase::Fresh
        }
    }

    /// Close out a tick: update violation counters, move safe mode, emit
    /// telemetry. Called exactly once per tick.
    pub fn finish_tick(&mut self, tick: TickId, window: &BudgetWindow, now: Instant) -> TickVerdict {
        let within_budget = !window.deadline.is_expired(now);
        let mut verdict = TickVerdict {
            within_budget,
            entered_safe_mode: false,
            exited_safe_mode: false,
        };

        if within_budget {
            self.consecutive_violations = 0;
            self.consecutive_clean += 1;
            if self.safe_mode.active && self.consecutive_clean >= self.recovery {
                self.exit_safe_mode(tick);
                verdict.exited_safe_mode = true;
            }
        } else {
            self.consecutive_clean = 0;
            self.consecutive_violations += 1;
            let consumed = window.consumed(now);
            let budget = window.deadline.at().saturating_duration_since(window.start);
            warn!(
                %tick,
                consumed_ms = consumed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                streak = self.consecutive_violations,
                "tick budget violation"
            );
            self.emitter.emit(
                TelemetryEvent::new(TelemetryKind::BudgetViolation {
                    module: None,
                    consumed_ms: consumed.as_millis() as u64,
                    budget_ms: budget.as_millis() as u64,
                })
                .with_tick(tick)
                .with_error(ErrorClass::BudgetViolation)
                .degraded(self.safe_mode.active),
            );
            if !self.safe_mode.active && self.consecutive_violations >= self.threshold {
                self.enter_safe_mode(
                    tick,
                    now,
                    format!(
                        "{} consecutive budget violations",
                        self.consecutive_violations
                    ),
                );
                verdict.entered_safe_mode = true;
            }
        }
        verdict
    }

    /// Engage safe mode for an external fatal cause (invariant violation).
    pub fn force_safe_mode(&mut self, tick: TickId, now: Instant, reason: impl Into<String>) {
        if !self.safe_mode.active {
            self.enter_safe_mode(tick, now, reason.into());
        }
    }

    fn enter_safe_mode(&mut self, tick: TickId, now: Instant, reason: String) {
        info!(%tick, %reason, "entering safe mode");
        self.safe_mode.active = true;
        self.safe_mode.reason = reason.clone();
        self.safe_mode.entered_at = Some(now);
        self.consecutive_clean = 0;
        self.emitter.emit(
            TelemetryEvent::new(TelemetryKind::SafeModeTransition {
                active: true,
                reason,
                allowed_tiers: self.safe_mode.allowed_indices(),
            })
            .with_tick(tick)
            .degraded(true),
        );
    }

    fn exit_safe_mode(&mut self, tick: TickId) {
        info!(%tick, clean_ticks = self.consecutive_clean, "exiting safe mode");
        self.safe_mode.active = false;
        self.safe_mode.entered_at = None;
        let reason = format!("{} consecutive clean ticks", self.consecutive_clean);
        self.safe_mode.reason.clear();
        self.consecutive_violations = 0;
        self.emitter.emit(
            TelemetryEvent::new(TelemetryKind::SafeModeTransition {
                active: false,
                reason,
                allowed_tiers: self.safe_mode.allowed_indices(),
            })
            .with_tick(tick),
        );
    }

    /// Read-only snapshot of safe-mode state.
    pub fn safe_mode(&self) -> SafeModeState {
        self.safe_mode.clone()
    }

    /// Current violation streak.
    pub fn violation_streak(&self) -> u32 {
        self.consecutive_violations
    }
}

/// Temporarily keeps slow modules off hazardous ticks.
///
/// A module whose rolling P95 exceeds its declared budget by `factor` is
/// held degraded for `hold_ticks` ticks.
#[derive(Debug)]
pub struct DegradationManager {
    factor: f64,
    hold_ticks: u64,
    degraded_until: HashMap<ModuleId, u64>,
}

impl DegradationManager {
    /// Create a manager with the default factor (1.5×) and hold (50 ticks).
    pub fn new() -> Self {
        Self::with_policy(1.5, 50)
    }

    /// Create a manager with an explicit policy.
    pub fn with_policy(factor: f64, hold_ticks: u64) -> Self {
        Self {
            factor: factor.max(1.0),
            hold_ticks: hold_ticks.max(1),
            degraded_until: HashMap::new(),
        }
    }

    /// Re-evaluate every module against the monitor. Returns modules that
    /// just became degraded.
    pub fn evaluate(&mut self, tick: TickId, monitor: &PerfMonitor) -> Vec<ModuleId> {
        let mut newly = Vec::new();
        for (module, stats) in monitor.all_stats() {
            let Some(budget) = monitor.declared_budget(&module) else {
                continue;
            };
            let limit = budget.as_secs_f64() * self.factor;
            if Duration::from_millis(stats.p95_ms).as_secs_f64() > limit {
                let until = tick.0 + self.hold_ticks;
                let was = self.degraded_until.insert(module.clone(), until);
                if was.is_none() {
                    newly.push(module);
                }
            }
        }
        self.degraded_until.retain(|_, until| *until > tick.0);
        newly
    }

    /// Seed from a persisted latency profile, against declared budgets.
    pub fn seed_from_profile(
        &mut self,
        profile: &LatencyProfile,
        declared: &HashMap<ModuleId, Duration>,
    ) {
        for (id, entry) in &profile.modules {
            let module = ModuleId::new(id.clone());
            let Some(budget) = declared.get(&module) else {
                continue;
            };
            if (entry.p95_ms as f64) > budget.as_millis() as f64 * self.factor {
                self.degraded_until.insert(module, self.hold_ticks);
            }
        }
    }

    /// Whether a module is currently degraded.
    pub fn is_degraded(&self, module: &ModuleId, tick: TickId) -> bool {
        self.degraded_until
            .get(module)
            .is_some_and(|until| *until > tick.0)
    }
}

impl Default for DegradationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_bus::LossyTopic;
    use cortex_core::BudgetMode;

    fn enforcer(threshold: u32, recovery: u32) -> (BudgetEnforcer, LossyTopic<TelemetryEvent>) {
        let topic = LossyTopic::new(256);
        (
            BudgetEnforcer::new(threshold, recovery, TelemetryEmitter::new(topic.clone())),
            topic,
        )
    }

    fn window(start: Instant, budget_ms: u64) -> BudgetWindow {
        BudgetWindow::open(start, BudgetMode::Hazardous, Duration::from_millis(budget_ms))
    }

    #[test]
    fn phases_follow_consumed_fraction() {
        let (e, _t) = enforcer(3, 10);
        let start = Instant::now();
        let w = window(start, 100);
        assert_eq!(e.assess(&w, start), TickPhase::Fresh);
        assert_eq!(
            e.assess(&w, start + Duration::from_millis(50)),
            TickPhase::Fresh
        );
        assert_eq!(
            e.assess(&w, start + Duration::from_millis(85)),
            TickPhase::Warn
        );
        assert_eq!(
            e.assess(&w, start + Duration::from_millis(100)),
            TickPhase::Preempt
        );
    }

    #[test]
    fn safe_mode_engages_after_threshold_violations() {
        let (mut e, topic) = enforcer(3, 10);
        let start = Instant::now();
        for i in 0..3u64 {
            let w = window(start, 50);
            let verdict = e.finish_tick(TickId(i), &w, start + Duration::from_millis(120));
            assert!(!verdict.within_budget);
            if i < 2 {
                assert!(!verdict.entered_safe_mode);
                assert!(!e.safe_mode().active);
            } else {
                assert!(verdict.entered_safe_mode);
            }
        }
        let sm = e.safe_mode();
        assert!(sm.active);
        assert!(sm.allows(Tier::Reflex));
        assert!(sm.allows(Tier::Reactive));
        assert!(!sm.allows(Tier::Hierarchical));
        assert!(!sm.allows(Tier::Deliberative));
        let events = topic.drain();
        assert!(events.iter().any(|e| matches!(
            e.kind,
            TelemetryKind::SafeModeTransition { active: true, .. }
        )));
    }

    #[test]
    fn safe_mode_releases_after_recovery_clean_ticks() {
        let (mut e, topic) = enforcer(1, 3);
        let start = Instant::now();
        e.finish_tick(TickId(0), &window(start, 50), start + Duration::from_millis(80));
        assert!(e.safe_mode().active);

        for i in 1..=3u64 {
            let w = window(start, 50);
            let verdict = e.finish_tick(TickId(i), &w, start + Duration::from_millis(10));
            assert!(verdict.within_budget);
            if i == 3 {
                assert!(verdict.exited_safe_mode);
            }
        }
        assert!(!e.safe_mode().active);
        let events = topic.drain();
        assert!(events.iter().any(|e| matches!(
            e.kind,
            TelemetryKind::SafeModeTransition { active: false, .. }
        )));
    }

    #[test]
    fn violation_streak_resets_on_clean_tick() {
        let (mut e, _t) = enforcer(3, 10);
        let start = Instant::now();
        e.finish_tick(TickId(0), &window(start, 50), start + Duration::from_millis(80));
        e.finish_tick(TickId(1), &window(start, 50), start + Duration::from_millis(80));
        assert_eq!(e.violation_streak(), 2);
        e.finish_tick(TickId(2), &window(start, 50), start + Duration::from_millis(10));
        assert_eq!(e.violation_streak(), 0);
        assert!(!e.safe_mode().active);
    }

    #[test]
    fn forced_safe_mode_for_invariant_violation() {
        let (mut e, _t) = enforcer(3, 10);
        e.force_safe_mode(TickId(9), Instant::now(), "eligibility self-check failed");
        assert!(e.safe_mode().active);
        assert_eq!(e.safe_mode().reason, "eligibility self-check failed");
    }
}

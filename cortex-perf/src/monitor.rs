//! Latency sampling and percentile tracking. Reporting only.

use cortex_bus::{TelemetryEmitter, TelemetryEvent, TelemetryKind};
use cortex_core::{BoundedRing, ErrorClass, ModuleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Fraction of a declared budget at which a warning fires.
pub const WARN_FRACTION: f64 = 0.8;

/// How a dispatched module finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    /// Ran to completion inside its deadline.
    Completed,
    /// Cancelled by the enforcer or a higher-priority dispatch.
    Preempted,
    /// Exceeded its deadline.
    TimedOut,
    /// Raised an error.
    Errored,
}

impl SampleOutcome {
    /// Name used in telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Completed => "completed",
            SampleOutcome::Preempted => "preempted",
            SampleOutcome::TimedOut => "timed_out",
            SampleOutcome::Errored => "errored",
        }
    }
}

/// One observed module execution.
#[derive(Debug, Clone)]
pub struct LatencySample {
    /// Module that ran.
    pub module: ModuleId,
    /// Monotonic start.
    pub started_at: Instant,
    /// Monotonic finish (or preemption/abandonment).
    pub finished_at: Instant,
    /// How it ended.
    pub outcome: SampleOutcome,
}

impl LatencySample {
    /// Observed wall time of the execution.
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Percentile snapshot for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLatencyStats {
    /// Median latency in ms.
    pub p50_ms: u64,
    /// 95th percentile in ms.
    pub p95_ms: u64,
    /// 99th percentile in ms.
    pub p99_ms: u64,
    /// Samples backing the percentiles.
    pub samples: usize,
}

/// Performance monitor: bounded sample ring per module, running
/// percentiles, budget warnings. Not authoritative for cancellation.
#[derive(Debug)]
pub struct PerfMonitor {
    capacity: usize,
    rings: HashMap<ModuleId, BoundedRing<LatencySample>>,
    declared: HashMap<ModuleId, Duration>,
    emitter: TelemetryEmitter,
}

impl PerfMonitor {
    /// Create a monitor keeping `capacity` samples per module.
    pub fn new(capacity: usize, emitter: TelemetryEmitter) -> Self {
        Self {
            capacity,
            rings: HashMap::new(),
            declared: HashMap::new(),
            emitter,
        }
    }

    /// Declare a module's latency budget so warnings can be assessed.
    pub fn declare_budget(&mut self, module: ModuleId, budget: Duration) {
        self.declared.insert(module, budget);
    }

    /// Record one sample, emitting a warning or violation event when the
    /// module's declared budget was approached or crossed.
    pub fn record(&mut self, sample: LatencySample) {
        let duration = sample.duration();
        let module = sample.module.clone();
        let outcome = sample.outcome;

        self.rings
            .entry(module.clone())
            .or_insert_with(|| BoundedRing::new(self.capacity))
            .push(sample);

        let error_class = match outcome {
            SampleOutcome::TimedOut => Some(ErrorClass::ModuleTimeout),
            SampleOutcome::Errored => Some(ErrorClass::ModuleError),
            SampleOutcome::Completed | SampleOutcome::Preempted => None,
        };
        let mut event = TelemetryEvent::new(TelemetryKind::ModuleOutcome {
            module: module.to_string(),
            outcome: outcome.as_str().to_string(),
            latency_ms: duration.as_millis() as u64,
        });
        if let Some(class) = error_class {
            event = event.with_error(class);
        }
        self.emitter.emit(event);

        if let Some(budget) = self.declared.get(&module).copied() {
            let fraction = duration.as_secs_f64() / budget.as_secs_f64().max(f64::EPSILON);
            if fraction >= 1.0 {
                warn!(module = %module, ?duration, ?budget, "module budget violation");
                self.emitter.emit(
                    TelemetryEvent::new(TelemetryKind::BudgetViolation {
                        module: Some(module.to_string()),
                        consumed_ms: duration.as_millis() as u64,
                        budget_ms: budget.as_millis() as u64,
                    })
                    .with_error(ErrorClass::BudgetViolation),
                );
            } else if fraction >= WARN_FRACTION {
                self.emitter.emit(TelemetryEvent::new(TelemetryKind::BudgetWarning {
                    module: Some(module.to_string()),
                    fraction,
                }));
            }
        }
    }

    /// Percentile snapshot for one module.
    pub fn stats(&self, module: &ModuleId) -> Option<ModuleLatencyStats> {
        let ring = self.rings.get(module)?;
        if ring.is_empty() {
            return None;
        }
        let mut ms: Vec<u64> = ring
            .iter()
            .map(|s| s.duration().as_millis() as u64)
            .collect();
        ms.sort_unstable();
        Some(ModuleLatencyStats {
            p50_ms: percentile(&ms, 0.50),
            p95_ms: percentile(&ms, 0.95),
            p99_ms: percentile(&ms, 0.99),
            samples: ms.len(),
        })
    }

    /// Snapshot for every module with samples.
    pub fn all_stats(&self) -> HashMap<ModuleId, ModuleLatencyStats> {
        self.rings
            .keys()
            .filter_map(|m| self.stats(m).map(|s| (m.clone(), s)))
            .collect()
    }

    /// Declared budget for a module, when known.
    pub fn declared_budget(&self, module: &ModuleId) -> Option<Duration> {
        self.declared.get(module).copied()
    }

    /// Ring occupancy, for bound checks.
    pub fn ring_len(&self, module: &ModuleId) -> usize {
        self.rings.get(module).map_or(0, |r| r.len())
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted_ms: &[u64], q: f64) -> u64 {
    if sorted_ms.is_empty() {
        return 0;
    }
    let rank = ((sorted_ms.len() as f64) * q).ceil() as usize;
    let index = rank.clamp(1, sorted_ms.len()) - 1;
    sorted_ms[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_bus::LossyTopic;

    fn monitor(capacity: usize) -> (PerfMonitor, LossyTopic<TelemetryEvent>) {
        let topic = LossyTopic::new(64);
        (
            PerfMonitor::new(capacity, TelemetryEmitter::new(topic.clone())),
            topic,
        )
    }

    fn sample(module: &str, ms: u64, outcome: SampleOutcome) -> LatencySample {
        let start = Instant::now();
        LatencySample {
            module: ModuleId::new(module),
            started_at: start,
            finished_at: start + Duration::from_millis(ms),
            outcome,
        }
    }

    #[test]
    fn percentile_nearest_rank() {
        let ms: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&ms, 0.50), 50);
        assert_eq!(percentile(&ms, 0.95), 95);
        assert_eq!(percentile(&ms, 0.99), 99);
        assert_eq!(percentile(&[7], 0.99), 7);
        assert_eq!(percentile(&[], 0.5), 0);
    }

    #[test]
    fn stats_reflect_recorded_samples() {
        let (mut m, _topic) = monitor(128);
        for ms in [10, 20, 30, 40, 50] {
            m.record(sample("planner", ms, SampleOutcome::Completed));
        }
        let stats = m.stats(&ModuleId::new("planner")).unwrap();
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.p50_ms, 30);
        assert_eq!(stats.p99_ms, 50);
    }

    #[test]
    fn ring_stays_bounded_under_stress() {
        let (mut m, _topic) = monitor(32);
        for i in 0..32 * 20 {
            m.record(sample("reflex", i % 12, SampleOutcome::Completed));
        }
        assert!(m.ring_len(&ModuleId::new("reflex")) <= 32);
    }

    #[test]
    fn warning_fires_above_eighty_percent() {
        let (mut m, topic) = monitor(16);
        m.declare_budget(ModuleId::new("planner"), Duration::from_millis(100));
        m.record(sample("planner", 85, SampleOutcome::Completed));
        let events = topic.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e.kind, TelemetryKind::BudgetWarning { .. })));
    }

    #[test]
    fn violation_fires_over_budget() {
        let (mut m, topic) = monitor(16);
        m.declare_budget(ModuleId::new("planner"), Duration::from_millis(100));
        m.record(sample("planner", 150, SampleOutcome::TimedOut));
        let events = topic.drain();
        assert!(events.iter().any(|e| matches!(
            e.kind,
            TelemetryKind::BudgetViolation { consumed_ms: 150, .. }
        )));
    }
}

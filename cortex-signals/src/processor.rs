//! The signal processor: ingest, trend tracking, need derivation.

use crate::rules::SignalRules;
use crate::{Result, SignalError};
use cortex_core::{BoundedRing, Need, Signal, SignalKind, SignalRef, Trend};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Per-kind state: normalized sample history plus contributing signals.
#[derive(Debug)]
struct KindHistory {
    samples: BoundedRing<f64>,
    refs: BoundedRing<SignalRef>,
    smoothed: Option<f64>,
}

impl KindHistory {
    fn new(capacity: usize) -> Self {
        Self {
            samples: BoundedRing::new(capacity),
            refs: BoundedRing::new(capacity),
            smoothed: None,
        }
    }

    fn level(&self) -> Option<f64> {
        self.samples.newest().copied()
    }

    fn mean_of_tail(&self, n: usize) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for v in self.samples.tail(n) {
            sum += v;
            count += 1;
        }
        Some(sum / count as f64)
    }
}

/// An active need and when it activated. `generated_at` survives across
/// ticks so older needs win the age tie-break.
#[derive(Debug, Clone, Copy)]
struct ActiveNeed {
    activated_at: Instant,
}

/// Read-only processor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalStats {
    /// Signals accepted.
    pub ingested: u64,
    /// Signals rejected (non-finite intensity).
    pub rejected: u64,
    /// Signals of unknown or unconfigured kinds, recorded and ignored.
    pub unknown: u64,
    /// Need activations plus deactivations.
    pub transitions: u64,
    /// Needs currently active.
    pub active_needs: usize,
}

/// Homeostatic signal processor.
///
/// Owns its history rings; consumers only ever see derived [`Need`] values
/// and [`SignalStats`] snapshots.
#[derive(Debug)]
pub struct SignalProcessor {
    rules: SignalRules,
    histories: HashMap<SignalKind, KindHistory>,
    active: HashMap<SignalKind, ActiveNeed>,
    unknown_kinds: HashMap<String, u64>,
    ingested: u64,
    rejected: u64,
    transitions: u64,
}

impl SignalProcessor {
    /// Create a processor with the given rules.
    pub fn new(rules: SignalRules) -> Self {
        Self {
            rules,
            histories: HashMap::new(),
            active: HashMap::new(),
            unknown_kinds: HashMap::new(),
            ingested: 0,
            rejected: 0,
            transitions: 0,
        }
    }

    /// Ingest one signal. O(1).
    ///
    /// Rejects non-finite intensity with [`SignalError::InvalidSignal`].
    /// Signals of kinds with no configured rule are counted and ignored,
    /// never an error.
    pub fn ingest(&mut self, signal: &Signal) -> Result<()> {
        if !signal.intensity.is_finite() {
            self.rejected += 1;
            return Err(SignalError::InvalidSignal {
                kind: signal.kind,
                intensity: signal.intensity,
            });
        }

        let Some(rule) = self.rules.kind(signal.kind).cloned() else {
            self.record_unknown(&signal.kind.to_string());
            return Ok(());
        };

        let clamped = signal
            .intensity
            .clamp(rule.normalization.clamp_min, rule.normalization.clamp_max)
            .clamp(0.0, 1.0);

        let capacity = self.rules.long_window;
        let history = self
            .histories
            .entry(signal.kind)
            .or_insert_with(|| KindHistory::new(capacity));

        let value = match (rule.normalization.smoothing, history.smoothed) {
            (Some(alpha), Some(prev)) => alpha * clamped + (1.0 - alpha) * prev,
            _ => clamped,
        };
        history.smoothed = Some(value);
        history.samples.push(value);
        history.refs.push(SignalRef {
            kind: signal.kind,
            intensity: value,
            source: signal.source.clone(),
            at: signal.at,
        });

        self.ingested += 1;
        trace!(kind = %signal.kind, raw = signal.intensity, normalized = value, "signal ingested");
        Ok(())
    }

    /// Record a signal kind name the core does not recognize.
    pub fn record_unknown(&mut self, name: &str) {
        let count = self.unknown_kinds.entry(name.to_string()).or_insert(0);
        *count += 1;
        debug!(kind = name, count = *count, "unknown signal kind ignored");
    }

    /// Derive the current needs. O(#kinds), deterministic: kinds are visited
    /// in declaration order and only monotonic `now` is consulted.
    pub fn derive(&mut self, now: Instant) -> Vec<Need> {
        let mut needs = Vec::new();
        for kind in SignalKind::ALL {
            let Some(rule) = self.rules.kind(kind) else {
                continue;
            };
            let need_rule = rule.need.clone();
            let Some(history) = self.histories.get(&kind) else {
                continue;
            };
            let Some(level) = history.level() else {
                continue;
            };

            let trend = self.trend_of(kind);
            let currently_active = self.active.contains_key(&kind);

            if currently_active {
                if level < need_rule.hysteresis_low {
                    self.active.remove(&kind);
                    self.transitions += 1;
                    debug!(kind = %kind, level, "need deactivated");
                    continue;
                }
            } else if level >= need_rule.trigger_intensity {
                self.active.insert(kind, ActiveNeed { activated_at: now });
                self.transitions += 1;
                debug!(kind = %kind, level, "need activated");
            } else {
                continue;
            }

            let active = self.active[&kind];
            let span = (need_rule.hysteresis_high - need_rule.hysteresis_low).max(f64::EPSILON);
            let scale = ((level - need_rule.hysteresis_low) / span).clamp(0.0, 1.0);
            let mut urgency = need_rule.base_urgency * scale;
            if trend == Trend::Rising {
                urgency += need_rule.trend_boost;
            }

            let history = &self.histories[&kind];
            needs.push(Need {
                kind,
                urgency: urgency.clamp(0.0, 1.0),
                trend,
                generated_at: active.activated_at,
                evidence: history.refs.tail(self.rules.short_window).cloned().collect(),
            });
        }
        needs
    }

    /// Trend of one kind over its history window.
    pub fn trend_of(&self, kind: SignalKind) -> Trend {
        let Some(history) = self.histories.get(&kind) else {
            return Trend::Stable;
        };
        let short = history.mean_of_tail(self.rules.short_window);
        let long = history.mean_of_tail(self.rules.long_window);
        match (short, long) {
            (Some(s), Some(l)) => {
                if s - l > self.rules.stability_threshold {
                    Trend::Rising
                } else if l - s > self.rules.stability_threshold {
                    Trend::Falling
                } else {
                    Trend::Stable
                }
            }
            _ => Trend::Stable,
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SignalStats {
        SignalStats {
            ingested: self.ingested,
            rejected: self.rejected,
            unknown: self.unknown_kinds.values().sum(),
            transitions: self.transitions,
            active_needs: self.active.len(),
        }
    }

    /// History ring occupancy per kind, for bound checks.
    pub fn history_len(&self, kind: SignalKind) -> usize {
        self.histories.get(&kind).map_or(0, |h| h.samples.len())
    }

    /// Configured history capacity.
    pub fn history_capacity(&self) -> usize {
        self.rules.long_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{KindRule, NeedRule, NormalizationRule};

    fn bare_rule(trigger: f64, low: f64) -> KindRule {
        KindRule {
            normalization: NormalizationRule::default(),
            need: NeedRule {
                trigger_intensity: trigger,
                hysteresis_low: low,
                hysteresis_high: 0.9,
                base_urgency: 0.8,
                trend_boost: 0.1,
            },
        }
    }

    fn processor_with(kind: SignalKind, rule: KindRule) -> SignalProcessor {
        let rules = SignalRules {
            kinds: [(kind, rule)].into_iter().collect(),
            short_window: 2,
            long_window: 8,
            stability_threshold: 0.05,
        };
        SignalProcessor::new(rules)
    }

    #[test]
    fn rejects_non_finite_intensity() {
        let mut p = SignalProcessor::new(SignalRules::default());
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = p
                .ingest(&Signal::new(SignalKind::Hunger, bad, "test"))
                .unwrap_err();
            assert!(matches!(err, SignalError::InvalidSignal { .. }));
        }
        assert_eq!(p.stats().rejected, 3);
        assert_eq!(p.stats().ingested, 0);
    }

    #[test]
    fn clamps_out_of_range_intensity() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        p.ingest(&Signal::new(SignalKind::Hunger, 7.5, "test"))
            .unwrap();
        let needs = p.derive(Instant::now());
        assert_eq!(needs.len(), 1);
        assert!(needs[0].urgency <= 1.0);
    }

    #[test]
    fn unconfigured_kind_is_recorded_and_ignored() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        p.ingest(&Signal::new(SignalKind::Social, 0.9, "test"))
            .unwrap();
        assert_eq!(p.stats().unknown, 1);
        assert!(p.derive(Instant::now()).is_empty());
    }

    #[test]
    fn hysteresis_prevents_flapping() {
        // Oscillation between trigger and the hysteresis band: one
        // activation, no deactivation.
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        let now = Instant::now();
        for (i, level) in [0.6, 0.4, 0.6, 0.4, 0.6, 0.4].iter().enumerate() {
            p.ingest(&Signal::new(SignalKind::Hunger, *level, "test"))
                .unwrap();
            let needs = p.derive(now + std::time::Duration::from_millis(i as u64));
            assert_eq!(needs.len(), 1, "need must stay active at step {i}");
        }
        assert_eq!(p.stats().transitions, 1);
    }

    #[test]
    fn need_deactivates_below_hysteresis_low() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        let now = Instant::now();
        p.ingest(&Signal::new(SignalKind::Hunger, 0.7, "test"))
            .unwrap();
        assert_eq!(p.derive(now).len(), 1);
        p.ingest(&Signal::new(SignalKind::Hunger, 0.1, "test"))
            .unwrap();
        assert!(p.derive(now).is_empty());
        assert_eq!(p.stats().transitions, 2);
    }

    #[test]
    fn generated_at_is_stable_across_ticks() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        let t0 = Instant::now();
        p.ingest(&Signal::new(SignalKind::Hunger, 0.8, "test"))
            .unwrap();
        let first = p.derive(t0);
        p.ingest(&Signal::new(SignalKind::Hunger, 0.8, "test"))
            .unwrap();
        let later = p.derive(t0 + std::time::Duration::from_secs(1));
        assert_eq!(first[0].generated_at, later[0].generated_at);
    }

    #[test]
    fn rising_trend_boosts_urgency() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.2, 0.1));
        let now = Instant::now();
        for level in [0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.8, 0.9] {
            p.ingest(&Signal::new(SignalKind::Hunger, level, "test"))
                .unwrap();
        }
        let needs = p.derive(now);
        assert_eq!(needs.len(), 1);
        assert_eq!(needs[0].trend, Trend::Rising);
    }

    #[test]
    fn history_ring_stays_bounded() {
        let mut p = processor_with(SignalKind::Hunger, bare_rule(0.5, 0.3));
        let cap = p.history_capacity();
        for i in 0..cap * 10 {
            p.ingest(&Signal::new(
                SignalKind::Hunger,
                (i % 10) as f64 / 10.0,
                "stress",
            ))
            .unwrap();
        }
        assert!(p.history_len(SignalKind::Hunger) <= cap);
    }

    #[test]
    fn derivation_is_deterministic() {
        let stream: Vec<f64> = (0..40).map(|i| ((i * 7) % 10) as f64 / 10.0).collect();
        let run = |stream: &[f64]| {
            let mut p = SignalProcessor::new(SignalRules::default());
            let now = Instant::now();
            let mut out = Vec::new();
            for (i, level) in stream.iter().enumerate() {
                for kind in SignalKind::ALL {
                    p.ingest(&Signal::new(kind, *level, "det")).unwrap();
                }
                let needs = p.derive(now + std::time::Duration::from_millis(i as u64));
                out.push(
                    needs
                        .iter()
                        .map(|n| (n.kind, (n.urgency * 1e9) as u64, n.trend))
                        .collect::<Vec<_>>(),
                );
            }
            out
        };
        assert_eq!(run(&stream), run(&stream));
    }
}

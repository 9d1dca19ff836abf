//! Declarative per-kind normalization and need rules.

use cortex_core::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How raw intensities of one kind are normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationRule {
    /// Lower clamp bound.
    pub clamp_min: f64,
    /// Upper clamp bound.
    pub clamp_max: f64,
    /// Exponential smoothing factor in (0,1]; `None` disables smoothing.
    /// Smaller values weight history more heavily.
    pub smoothing: Option<f64>,
}

impl Default for NormalizationRule {
    fn default() -> Self {
        Self {
            clamp_min: 0.0,
            clamp_max: 1.0,
            smoothing: None,
        }
    }
}

/// When a kind's level produces a need, and how urgent it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedRule {
    /// Level at which an inactive need activates.
    pub trigger_intensity: f64,
    /// An active need deactivates only below this level.
    pub hysteresis_low: f64,
    /// Level at which urgency saturates.
    pub hysteresis_high: f64,
    /// Urgency at the saturation level.
    pub base_urgency: f64,
    /// Extra urgency while the signal is rising.
    pub trend_boost: f64,
}

/// Rules for one signal kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindRule {
    /// Normalization applied at ingest.
    pub normalization: NormalizationRule,
    /// Need derivation rule.
    pub need: NeedRule,
}

/// Complete rule set plus the trend-window geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRules {
    /// Per-kind rules. Kinds without an entry are counted and ignored.
    pub kinds: HashMap<SignalKind, KindRule>,
    /// Samples in the short trend window.
    pub short_window: usize,
    /// Samples in the long trend window; also the history ring capacity.
    pub long_window: usize,
    /// Mean difference below which the trend is Stable.
    pub stability_threshold: f64,
}

impl SignalRules {
    /// Rule for a kind, if configured.
    pub fn kind(&self, kind: SignalKind) -> Option<&KindRule> {
        self.kinds.get(&kind)
    }

    /// Replace the rule for one kind.
    pub fn with_kind(mut self, kind: SignalKind, rule: KindRule) -> Self {
        self.kinds.insert(kind, rule);
        self
    }

    /// Replace the trend window geometry.
    pub fn with_windows(mut self, short: usize, long: usize) -> Self {
        self.short_window = short.max(1);
        self.long_window = long.max(self.short_window);
        self
    }
}

impl Default for SignalRules {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        // Survival pressures trigger early and carry high urgency; social
        // and exploratory pressures trigger late and stay mild.
        kinds.insert(
            SignalKind::Health,
            rule(0.5, 0.3, 0.9, 0.9, 0.1, Some(0.6)),
        );
        kinds.insert(
            SignalKind::Safety,
            rule(0.4, 0.2, 0.8, 0.95, 0.05, None),
        );
        kinds.insert(
            SignalKind::Hunger,
            rule(0.6, 0.4, 0.9, 0.6, 0.1, Some(0.5)),
        );
        kinds.insert(
            SignalKind::Energy,
            rule(0.7, 0.5, 0.95, 0.4, 0.1, Some(0.5)),
        );
        kinds.insert(
            SignalKind::Social,
            rule(0.7, 0.5, 0.95, 0.3, 0.1, None),
        );
        kinds.insert(
            SignalKind::Curiosity,
            rule(0.8, 0.6, 0.95, 0.2, 0.05, None),
        );
        Self {
            kinds,
            short_window: 4,
            long_window: 16,
            stability_threshold: 0.05,
        }
    }
}

fn rule(
    trigger: f64,
    low: f64,
    high: f64,
    base: f64,
    boost: f64,
    smoothing: Option<f64>,
) -> KindRule {
    KindRule {
        normalization: NormalizationRule {
            smoothing,
            ..NormalizationRule::default()
        },
        need: NeedRule {
            trigger_intensity: trigger,
            hysteresis_low: low,
            hysteresis_high: high,
            base_urgency: base,
            trend_boost: boost,
        },
    }
}

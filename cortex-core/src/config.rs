//! Environment-driven configuration.
//!
//! Recognized variables and defaults:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LOOP_TARGET_MS` | 50 |
//! | `LOOP_MAX_MS` | 200 |
//! | `SAFEMODE_THRESHOLD` | 3 |
//! | `SAFEMODE_RECOVERY` | 10 |
//! | `REDUCER_TIMEOUT_MS` | 500 |
//! | `CIRCUIT_FAIL_THRESHOLD` | 5 |
//! | `CIRCUIT_COOLDOWN_MS` | 30000 |
//! | `KEEPALIVE_BASE_INTERVAL_MS` | 30000 |
//! | `KEEPALIVE_MAX_PER_MIN` | 10 |
//! | `IDLE_USER_COMMAND_WINDOW_MS` | 10000 |
//! | `IDLE_TASK_WINDOW_MS` | 30000 |
//! | `TELEMETRY_TOPIC_CAPACITY` | 1024 |
//!
//! Parsing failures are [`CoreError::Config`] and abort startup (exit 64).
//! The sanitizer version is pinned by the reduction crate and is not
//! configurable.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Complete configuration for the control core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    /// Hazardous tick budget (`LOOP_TARGET_MS`).
    pub loop_target_ms: u64,
    /// Routine tick budget (`LOOP_MAX_MS`).
    pub loop_max_ms: u64,
    /// Consecutive budget violations before safe mode engages.
    pub safemode_threshold: u32,
    /// Consecutive clean ticks before safe mode releases.
    pub safemode_recovery: u32,
    /// Per-call semantic reduction deadline.
    pub reducer_timeout_ms: u64,
    /// Consecutive reduction failures before the circuit opens.
    pub circuit_fail_threshold: u32,
    /// How long the circuit stays open before probing.
    pub circuit_cooldown_ms: u64,
    /// Base keep-alive interval.
    pub keepalive_base_interval_ms: u64,
    /// Sliding-window cap on keep-alive ticks per minute.
    pub keepalive_max_per_min: u32,
    /// Recency window for user commands in the idle predicate.
    pub idle_user_command_window_ms: u64,
    /// Recency window for task conversions in the idle predicate.
    pub idle_task_window_ms: u64,
    /// Per-topic capacity for bus channels.
    pub telemetry_topic_capacity: usize,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            loop_target_ms: 50,
            loop_max_ms: 200,
            safemode_threshold: 3,
            safemode_recovery: 10,
            reducer_timeout_ms: 500,
            circuit_fail_threshold: 5,
            circuit_cooldown_ms: 30_000,
            keepalive_base_interval_ms: 30_000,
            keepalive_max_per_min: 10,
            idle_user_command_window_ms: 10_000,
            idle_task_window_ms: 30_000,
            telemetry_topic_capacity: 1024,
        }
    }
}

impl CortexConfig {
    /// Load configuration from the environment, starting from defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        read_u64("LOOP_TARGET_MS", &mut cfg.loop_target_ms)?;
        read_u64("LOOP_MAX_MS", &mut cfg.loop_max_ms)?;
        read_u32("SAFEMODE_THRESHOLD", &mut cfg.safemode_threshold)?;
        read_u32("SAFEMODE_RECOVERY", &mut cfg.safemode_recovery)?;
        read_u64("REDUCER_TIMEOUT_MS", &mut cfg.reducer_timeout_ms)?;
        read_u32("CIRCUIT_FAIL_THRESHOLD", &mut cfg.circuit_fail_threshold)?;
        read_u64("CIRCUIT_COOLDOWN_MS", &mut cfg.circuit_cooldown_ms)?;
        read_u64(
            "KEEPALIVE_BASE_INTERVAL_MS",
            &mut cfg.keepalive_base_interval_ms,
        )?;
        read_u32("KEEPALIVE_MAX_PER_MIN", &mut cfg.keepalive_max_per_min)?;
        read_u64(
            "IDLE_USER_COMMAND_WINDOW_MS",
            &mut cfg.idle_user_command_window_ms,
        )?;
        read_u64("IDLE_TASK_WINDOW_MS", &mut cfg.idle_task_window_ms)?;
        read_usize(
            "TELEMETRY_TOPIC_CAPACITY",
            &mut cfg.telemetry_topic_capacity,
        )?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that cannot schedule anything.
    pub fn validate(&self) -> Result<()> {
        if self.loop_target_ms == 0 || self.loop_max_ms == 0 {
            return Err(CoreError::Config {
                name: "LOOP_TARGET_MS/LOOP_MAX_MS".to_string(),
                value: None,
                reason: "tick budgets must be nonzero".to_string(),
            });
        }
        if self.loop_target_ms > self.loop_max_ms {
            return Err(CoreError::Config {
                name: "LOOP_TARGET_MS".to_string(),
                value: Some(self.loop_target_ms.to_string()),
                reason: format!(
                    "hazardous budget exceeds routine budget ({} ms)",
                    self.loop_max_ms
                ),
            });
        }
        if self.telemetry_topic_capacity == 0 {
            return Err(CoreError::Config {
                name: "TELEMETRY_TOPIC_CAPACITY".to_string(),
                value: Some("0".to_string()),
                reason: "topic capacity must be nonzero".to_string(),
            });
        }
        Ok(())
    }

    /// Hazardous tick budget as a duration.
    pub fn hazardous_budget(&self) -> Duration {
        Duration::from_millis(self.loop_target_ms)
    }

    /// Routine tick budget as a duration.
    pub fn routine_budget(&self) -> Duration {
        Duration::from_millis(self.loop_max_ms)
    }

    /// Per-call reduction deadline as a duration.
    pub fn reducer_timeout(&self) -> Duration {
        Duration::from_millis(self.reducer_timeout_ms)
    }

    /// Circuit cooldown as a duration.
    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    /// Set tick budgets.
    pub fn with_loop_budgets(mut self, target_ms: u64, max_ms: u64) -> Self {
        self.loop_target_ms = target_ms;
        self.loop_max_ms = max_ms;
        self
    }

    /// Set safe-mode entry/exit counters.
    pub fn with_safemode(mut self, threshold: u32, recovery: u32) -> Self {
        self.safemode_threshold = threshold;
        self.safemode_recovery = recovery;
        self
    }

    /// Set reduction client timings.
    pub fn with_reducer(mut self, timeout_ms: u64, fail_threshold: u32, cooldown_ms: u64) -> Self {
        self.reducer_timeout_ms = timeout_ms;
        self.circuit_fail_threshold = fail_threshold;
        self.circuit_cooldown_ms = cooldown_ms;
        self
    }

    /// Set keep-alive pacing.
    pub fn with_keepalive(mut self, base_interval_ms: u64, max_per_min: u32) -> Self {
        self.keepalive_base_interval_ms = base_interval_ms;
        self.keepalive_max_per_min = max_per_min;
        self
    }
}

fn read_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn read_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = read_var(name) {
        *slot = raw.trim().parse::<u64>().map_err(|e| CoreError::Config {
            name: name.to_string(),
            value: Some(raw.clone()),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn read_u32(name: &str, slot: &mut u32) -> Result<()> {
    if let Some(raw) = read_var(name) {
        *slot = raw.trim().parse::<u32>().map_err(|e| CoreError::Config {
            name: name.to_string(),
            value: Some(raw.clone()),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn read_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Some(raw) = read_var(name) {
        *slot = raw.trim().parse::<usize>().map_err(|e| CoreError::Config {
            name: name.to_string(),
            value: Some(raw.clone()),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = CortexConfig::default();
        assert_eq!(cfg.loop_target_ms, 50);
        assert_eq!(cfg.loop_max_ms, 200);
        assert_eq!(cfg.safemode_threshold, 3);
        assert_eq!(cfg.safemode_recovery, 10);
        assert_eq!(cfg.reducer_timeout_ms, 500);
        assert_eq!(cfg.circuit_fail_threshold, 5);
        assert_eq!(cfg.circuit_cooldown_ms, 30_000);
        assert_eq!(cfg.keepalive_base_interval_ms, 30_000);
        assert_eq!(cfg.keepalive_max_per_min, 10);
        assert_eq!(cfg.idle_user_command_window_ms, 10_000);
        assert_eq!(cfg.idle_task_window_ms, 30_000);
        assert_eq!(cfg.telemetry_topic_capacity, 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_budgets() {
        let cfg = CortexConfig::default().with_loop_budgets(500, 200);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn builders_compose() {
        let cfg = CortexConfig::default()
            .with_safemode(5, 20)
            .with_reducer(250, 3, 10_000)
            .with_keepalive(5_000, 4);
        assert_eq!(cfg.safemode_threshold, 5);
        assert_eq!(cfg.reducer_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.circuit_cooldown(), Duration::from_millis(10_000));
        assert_eq!(cfg.keepalive_max_per_min, 4);
    }
}

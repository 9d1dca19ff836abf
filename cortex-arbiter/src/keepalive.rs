//! Keep-alive: the idle-only intention check loop.
//!
//! When the arbiter declares the system idle, the controller renders a
//! non-injective prompt (a factual situation frame that never proposes
//! candidate actions) and hands it to the same sanitize, reduce,
//! eligibility pipeline as any other utterance. Authorship of intent stays
//! with whoever answers the prompt.
//!
//! Pacing: a base interval, shortened (within a bound) by external
//! stimuli, capped by a sliding one-minute window. Exceeding the cap opens
//! a keep-alive circuit for the rest of the window.

use cortex_bus::{TelemetryEmitter, TelemetryEvent, TelemetryKind};
use cortex_core::{CortexConfig, ThreatLevel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared activity facts behind the idle predicate. Single struct, atomic
/// fields: external collaborators write, the keep-alive controller reads.
#[derive(Debug, Default)]
pub struct ActivityState {
    active_plan_steps: AtomicUsize,
    threat: AtomicU8,
    last_user_command: Mutex<Option<Instant>>,
    last_task_conversion: Mutex<Option<Instant>>,
}

/// Cloneable handle to the shared activity state.
#[derive(Debug, Clone, Default)]
pub struct ActivityHandle(Arc<ActivityState>);

impl ActivityHandle {
    /// Fresh state: no plan steps, no threat, no recent activity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the number of currently active plan steps.
    pub fn set_active_plan_steps(&self, steps: usize) {
        self.0.active_plan_steps.store(steps, Ordering::SeqCst);
    }

    /// Currently active plan steps.
    pub fn active_plan_steps(&self) -> usize {
        self.0.active_plan_steps.load(Ordering::SeqCst)
    }

    /// Report the current threat level.
    pub fn set_threat(&self, threat: ThreatLevel) {
        self.0.threat.store(threat_to_u8(threat), Ordering::SeqCst);
    }

    /// Current threat level.
    pub fn threat(&self) -> ThreatLevel {
        threat_from_u8(self.0.threat.load(Ordering::SeqCst))
    }

    /// Note a user command arriving now.
    pub fn note_user_command(&self, now: Instant) {
        *self.0.last_user_command.lock().expect("activity lock") = Some(now);
    }

    /// Note a task conversion completing now. Written by the arbiter.
    pub fn note_task_conversion(&self, now: Instant) {
        *self.0.last_task_conversion.lock().expect("activity lock") = Some(now);
    }

    fn last_user_command(&self) -> Option<Instant> {
        *self.0.last_user_command.lock().expect("activity lock")
    }

    fn last_task_conversion(&self) -> Option<Instant> {
        *self.0.last_task_conversion.lock().expect("activity lock")
    }
}

fn threat_to_u8(t: ThreatLevel) -> u8 {
    match t {
        ThreatLevel::None => 0,
        ThreatLevel::Low => 1,
        ThreatLevel::Medium => 2,
        ThreatLevel::High => 3,
        ThreatLevel::Critical => 4,
    }
}

fn threat_from_u8(v: u8) -> ThreatLevel {
    match v {
        0 => ThreatLevel::None,
        1 => ThreatLevel::Low,
        2 => ThreatLevel::Medium,
        3 => ThreatLevel::High,
        _ => ThreatLevel::Critical,
    }
}

/// Keep-alive pacing configuration.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Base interval between intention checks.
    pub base_interval: Duration,
    /// Sliding-window cap on checks per minute.
    pub max_per_min: u32,
    /// Recency window for user commands.
    pub user_command_window: Duration,
    /// Recency window for task conversions.
    pub task_window: Duration,
    /// Lower bound on the stimulus acceleration factor (e.g. 0.25 allows
    /// shortening the interval to a quarter, never further).
    pub min_accel_factor: f64,
}

impl KeepAliveConfig {
    /// Derive from the core configuration.
    pub fn from_cortex(config: &CortexConfig) -> Self {
        Self {
            base_interval: Duration::from_millis(config.keepalive_base_interval_ms),
            max_per_min: config.keepalive_max_per_min,
            user_command_window: Duration::from_millis(config.idle_user_command_window_ms),
            task_window: Duration::from_millis(config.idle_task_window_ms),
            min_accel_factor: 0.25,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self::from_cortex(&CortexConfig::default())
    }
}

/// What a poll decided.
#[derive(Debug, Clone, PartialEq)]
pub enum KeepAliveDecision {
    /// Interval has not elapsed (or the circuit is open).
    NotDue,
    /// Idle: run an intention check with this prompt.
    Tick {
        /// The rendered non-injective prompt.
        prompt: String,
    },
    /// Due but not idle; first failing clause named.
    SkipNotIdle {
        /// Why the system is not idle.
        reason: &'static str,
    },
    /// The per-minute cap was hit; the circuit just opened.
    RateLimited,
}

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// The keep-alive controller.
#[derive(Debug)]
pub struct KeepAliveController {
    config: KeepAliveConfig,
    emitter: TelemetryEmitter,
    last_check: Option<Instant>,
    ticks_in_window: VecDeque<Instant>,
    accel: f64,
    circuit_open_until: Option<Instant>,
}

impl KeepAliveController {
    /// Create a controller.
    pub fn new(config: KeepAliveConfig, emitter: TelemetryEmitter) -> Self {
        Self {
            config,
            emitter,
            last_check: None,
            ticks_in_window: VecDeque::new(),
            accel: 1.0,
            circuit_open_until: None,
        }
    }

    /// An external stimulus: shorten the next interval, bounded below.
    pub fn note_stimulus(&mut self) {
        self.accel = (self.accel * 0.5).max(self.config.min_accel_factor);
        debug!(accel = self.accel, "keep-alive interval accelerated");
    }

    /// Current effective interval.
    pub fn effective_interval(&self) -> Duration {
        Duration::from_secs_f64(self.config.base_interval.as_secs_f64() * self.accel)
    }

    /// Evaluate the loop at `now`. At most one decision per interval.
    pub fn poll(&mut self, now: Instant, activity: &ActivityHandle) -> KeepAliveDecision {
        while let Some(front) = self.ticks_in_window.front() {
            if now.saturating_duration_since(*front) > RATE_WINDOW {
                self.ticks_in_window.pop_front();
            } else {
                break;
            }
        }

        if let Some(until) = self.circuit_open_until {
            if now < until {
                return KeepAliveDecision::NotDue;
            }
            self.circuit_open_until = None;
        }

        let due = self
            .last_check
            .map_or(true, |t| now.saturating_duration_since(t) >= self.effective_interval());
        if !due {
            return KeepAliveDecision::NotDue;
        }
        self.last_check = Some(now);

        if let Some(reason) = self.not_idle_reason(now, activity) {
            self.emitter.emit(TelemetryEvent::new(
                TelemetryKind::KeepaliveSkipNotIdle {
                    reason: reason.to_string(),
                },
            ));
            return KeepAliveDecision::SkipNotIdle { reason };
        }

        if self.ticks_in_window.len() >= self.config.max_per_min as usize {
            warn!(
                cap = self.config.max_per_min,
                "keep-alive rate limit exceeded; opening circuit"
            );
            self.circuit_open_until = Some(now + RATE_WINDOW);
            self.emitter.emit(TelemetryEvent::new(TelemetryKind::KeepaliveViolation {
                reason: "rate_limit_exceeded".to_string(),
            }));
            return KeepAliveDecision::RateLimited;
        }

        self.ticks_in_window.push_back(now);
        let interval_ms = self.effective_interval().as_millis() as u64;
        self.accel = 1.0;
        self.emitter.emit(TelemetryEvent::new(TelemetryKind::KeepaliveTick {
            interval_ms,
            window_count: self.ticks_in_window.len() as u32,
        }));
        KeepAliveDecision::Tick {
            prompt: render_prompt(now, activity),
        }
    }

    /// First idle-predicate clause that fails, in contract order.
    fn not_idle_reason(&self, now: Instant, activity: &ActivityHandle) -> Option<&'static str> {
        if activity.active_plan_steps() > 0 {
            return Some("active_plan_steps");
        }
        if let Some(at) = activity.last_task_conversion() {
            if now.saturating_duration_since(at) < self.config.task_window {
                return Some("recent_task_conversion");
            }
        }
        if activity.threat() >= ThreatLevel::High {
            return Some("threat_level");
        }
        if let Some(at) = activity.last_user_command() {
            if now.saturating_duration_since(at) < self.config.user_command_window {
                return Some("recent_user_command");
            }
        }
        None
    }
}

/// Render the situation frame. Facts only: the prompt never proposes,
/// names, or ranks candidate actions.
fn render_prompt(now: Instant, activity: &ActivityHandle) -> String {
    let threat = activity.threat();
    let since_task = activity
        .last_task_conversion()
        .map(|at| now.saturating_duration_since(at).as_secs());
    let since_command = activity
        .last_user_command()
        .map(|at| now.saturating_duration_since(at).as_secs());
    format!(
        "Situation: threat level {threat:?}. Active plan steps: {}. \
         Seconds since last executable task: {}. \
         Seconds since last operator command: {}. \
         If an intention is currently held, state it.",
        activity.active_plan_steps(),
        since_task.map_or("none recorded".to_string(), |s| s.to_string()),
        since_command.map_or("none recorded".to_string(), |s| s.to_string()),
    )
}

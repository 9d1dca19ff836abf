//! The semantic reduction client: the only gateway to the authority.
//!
//! `reduce` never returns an error. Whatever happens on the wire
//! (timeout, transport failure, open circuit, malformed response), the
//! caller receives a well-formed [`ReductionProvenance`] with
//! `sterling_processed = false`, so the downstream gate denies conversion
//! (fail-closed, not fail-open).
//!
//! Connection state machine:
//! `Connecting → Connected ⇄ HalfOpen → Open (on K failures) → HalfOpen
//! (after cooldown)`. Every transition emits telemetry.

use crate::envelope::Envelope;
use crate::provenance::{ReductionProvenance, ReductionResponse};
use async_trait::async_trait;
use cortex_bus::{TelemetryEmitter, TelemetryEvent, TelemetryKind};
use cortex_core::{CancelToken, Clock, CortexConfig, ErrorClass, MonotonicClock};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Transport-level failures. The client maps all of them to fail-closed
/// provenance; the distinction only feeds telemetry and the breaker.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The authority could not be reached.
    #[error("authority unreachable: {0}")]
    Unreachable(String),
    /// The connection broke mid-exchange.
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// A bidirectional, ordered, framed channel to the semantic authority.
/// Implementations own framing and reconnection of the raw link; the
/// client owns deadlines, correlation, and the circuit breaker.
#[async_trait]
pub trait ReductionTransport: Send + Sync {
    /// Send one envelope and await its correlated response.
    async fn send(&self, envelope: &Envelope) -> std::result::Result<ReductionResponse, TransportError>;

    /// Liveness probe.
    async fn ping(&self) -> std::result::Result<(), TransportError>;
}

/// Connection/circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No successful exchange yet.
    Connecting,
    /// Healthy.
    Connected,
    /// Circuit open: calls short-circuit without touching the transport.
    Open,
    /// Cooldown elapsed; the next call is a probe.
    HalfOpen,
}

impl ClientState {
    /// Name used in telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Open => "open",
            ClientState::HalfOpen => "half_open",
        }
    }
}

/// Exponential backoff with jitter for reconnect pacing.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    next: Duration,
}

impl Backoff {
    /// Create a backoff schedule. `jitter` is a fraction of the delay,
    /// e.g. 0.2 for ±20%.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            next: initial,
        }
    }

    /// The next delay; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        let grown = base.as_secs_f64() * self.multiplier;
        self.next = Duration::from_secs_f64(grown.min(self.max.as_secs_f64()));
        if self.jitter == 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0))
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30), 2.0, 0.2)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    /// Per-call deadline.
    pub timeout: Duration,
    /// Consecutive failures within the window that open the circuit.
    pub fail_threshold: u32,
    /// Failures must land within this window to count as consecutive.
    pub failure_window: Duration,
    /// How long the circuit stays open before a half-open probe.
    pub cooldown: Duration,
    /// Concurrent in-flight reductions.
    pub max_concurrency: usize,
    /// Heartbeat ping period.
    pub heartbeat_interval: Duration,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            fail_threshold: 5,
            failure_window: Duration::from_secs(10),
            cooldown: Duration::from_millis(30_000),
            max_concurrency: 4,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl ReducerConfig {
    /// Derive from the core configuration.
    pub fn from_cortex(config: &CortexConfig) -> Self {
        Self {
            timeout: config.reducer_timeout(),
            fail_threshold: config.circuit_fail_threshold,
            cooldown: config.circuit_cooldown(),
            ..Self::default()
        }
    }
}

/// Read-only client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitStats {
    /// Successful reductions.
    pub successes: u64,
    /// Failed attempts (transport, timeout, malformed).
    pub failures: u64,
    /// Calls short-circuited by an open breaker.
    pub short_circuits: u64,
}

#[derive(Debug)]
struct StateMachine {
    state: ClientState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
}

/// The reduction client.
pub struct SterlingClient {
    transport: Arc<dyn ReductionTransport>,
    config: ReducerConfig,
    state: Mutex<StateMachine>,
    semaphore: Semaphore,
    emitter: TelemetryEmitter,
    clock: Arc<dyn Clock>,
    successes: AtomicU64,
    failures: AtomicU64,
    short_circuits: AtomicU64,
}

impl SterlingClient {
    /// Create a client over a transport.
    pub fn new(
        transport: Arc<dyn ReductionTransport>,
        config: ReducerConfig,
        emitter: TelemetryEmitter,
    ) -> Self {
        Self::with_clock(transport, config, emitter, Arc::new(MonotonicClock))
    }

    /// Create a client with an explicit clock (deterministic tests).
    pub fn with_clock(
        transport: Arc<dyn ReductionTransport>,
        config: ReducerConfig,
        emitter: TelemetryEmitter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            transport,
            config,
            state: Mutex::new(StateMachine {
                state: ClientState::Connecting,
                consecutive_failures: 0,
                window_start: None,
                opened_at: None,
            }),
            semaphore: Semaphore::new(max_concurrency),
            emitter,
            clock,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
        }
    }

    /// Reduce one envelope. Never errors: every failure path synthesizes a
    /// fail-closed provenance.
    pub async fn reduce(&self, envelope: &Envelope) -> ReductionProvenance {
        let started = self.clock.now();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("reduction semaphore closed");

        if !self.breaker_allows() {
            self.short_circuits.fetch_add(1, Ordering::Relaxed);
            let provenance =
                ReductionProvenance::unprocessed(&envelope.envelope_id, "circuit_open", 0);
            self.emit_result(&provenance, Some(ErrorClass::ReducerUnavailable));
            return provenance;
        }

        let outcome = tokio::time::timeout(self.config.timeout, self.transport.send(envelope)).await;
        let duration_ms = self
            .clock
            .now()
            .saturating_duration_since(started)
            .as_millis() as u64;

        let provenance = match outcome {
            Ok(Ok(response)) => match response.validate(&envelope.envelope_id) {
                Ok(()) => {
                    self.record_success();
                    ReductionProvenance::processed(&response, duration_ms)
                }
                Err(e) => {
                    warn!(envelope = %envelope.envelope_id, error = %e, "malformed reducer response");
                    self.record_failure();
                    let provenance = ReductionProvenance::unprocessed(
                        &envelope.envelope_id,
                        "malformed_response",
                        duration_ms,
                    );
                    self.emit_result(&provenance, Some(ErrorClass::ReducerMalformed));
                    return provenance;
                }
            },
            Ok(Err(e)) => {
                debug!(envelope = %envelope.envelope_id, error = %e, "reduction transport failure");
                self.record_failure();
                ReductionProvenance::unprocessed(&envelope.envelope_id, e.to_string(), duration_ms)
            }
            Err(_) => {
                debug!(envelope = %envelope.envelope_id, "reduction timeout");
                self.record_failure();
                ReductionProvenance::unprocessed(&envelope.envelope_id, "timeout", duration_ms)
            }
        };

        let error_class = (!provenance.sterling_processed).then_some(ErrorClass::ReducerUnavailable);
        self.emit_result(&provenance, error_class);
        provenance
    }

    /// One heartbeat probe. Success and failure feed the breaker exactly
    /// like reductions do.
    pub async fn heartbeat_once(&self) {
        if !self.breaker_allows() {
            return;
        }
        let outcome = tokio::time::timeout(self.config.timeout, self.transport.ping()).await;
        match outcome {
            Ok(Ok(())) => self.record_success(),
            _ => self.record_failure(),
        }
    }

    /// Heartbeat loop: pings every `heartbeat_interval` while healthy and
    /// backs off (with jitter) while the authority is down. Runs until the
    /// token fires.
    pub async fn run_heartbeat(&self, cancel: CancelToken) {
        let mut backoff = Backoff::default();
        loop {
            let delay = if self.state() == ClientState::Connected {
                backoff.reset();
                self.config.heartbeat_interval
            } else {
                backoff.next_delay()
            };
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => self.heartbeat_once().await,
            }
        }
    }

    /// Current connection/circuit state.
    pub fn state(&self) -> ClientState {
        self.state.lock().expect("client state poisoned").state
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
        }
    }

    /// Check the breaker, moving Open → HalfOpen once the cooldown has
    /// elapsed. Returns whether a call may proceed.
    fn breaker_allows(&self) -> bool {
        let now = self.clock.now();
        let mut sm = self.state.lock().expect("client state poisoned");
        match sm.state {
            ClientState::Open => {
                let cooled = sm
                    .opened_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= self.config.cooldown);
                if cooled {
                    self.transition(&mut sm, ClientState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut sm = self.state.lock().expect("client state poisoned");
        sm.consecutive_failures = 0;
        sm.window_start = None;
        sm.opened_at = None;
        if sm.state != ClientState::Connected {
            self.transition(&mut sm, ClientState::Connected);
        }
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut sm = self.state.lock().expect("client state poisoned");

        let window_live = sm
            .window_start
            .is_some_and(|start| now.saturating_duration_since(start) <= self.config.failure_window);
        if window_live {
            sm.consecutive_failures += 1;
        } else {
            sm.window_start = Some(now);
            sm.consecutive_failures = 1;
        }

        let should_open = sm.state == ClientState::HalfOpen
            || sm.consecutive_failures >= self.config.fail_threshold;
        if should_open && sm.state != ClientState::Open {
            sm.opened_at = Some(now);
            self.transition(&mut sm, ClientState::Open);
        }
    }

    fn transition(&self, sm: &mut StateMachine, to: ClientState) {
        let from = sm.state;
        if from == to {
            return;
        }
        sm.state = to;
        debug!(from = from.as_str(), to = to.as_str(), "reducer circuit transition");
        self.emitter.emit(TelemetryEvent::new(TelemetryKind::CircuitTransition {
            from: from.as_str().to_string(),
            circuit_state: to.as_str().to_string(),
        }));
    }

    fn emit_result(&self, provenance: &ReductionProvenance, error_class: Option<ErrorClass>) {
        let mut event = TelemetryEvent::new(TelemetryKind::ReductionResult {
            sterling_processed: provenance.sterling_processed,
            is_executable: provenance.is_executable,
            block_reason: provenance.block_reason.clone(),
            sterling_error: provenance.sterling_error.clone(),
            reduce_latency_ms: provenance.duration_ms,
        })
        .with_envelope(provenance.envelope_id.clone())
        .with_latency_ms(provenance.duration_ms);
        if let Some(class) = error_class {
            event = event.with_error(class);
        }
        self.emitter.emit(event);
    }
}

impl std::fmt::Debug for SterlingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SterlingClient")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! The arbiter: tick loop, preemption ladder, and the reduction pipeline.

use crate::keepalive::{ActivityHandle, KeepAliveConfig, KeepAliveController, KeepAliveDecision};
use crate::registry::{CognitiveModule, ModuleRegistry, ModuleResult, ModuleState, TickContext};
use crate::{ArbiterError, Result};
use chrono::Utc;
use cortex_bus::{
    CortexBus, SafetyAlert, TaskRecord, TelemetryEmitter, TelemetryEvent, TelemetryKind,
    ThoughtRecord,
};
use cortex_core::{
    BudgetMode, BudgetWindow, CancelToken, CandidateUtterance, Clock, CortexConfig, ErrorClass,
    ModuleId, MonotonicClock, Need, Signal, SignalKind, ThreatLevel, TickId, Tier,
    BUDGET_SLACK_MS,
};
use cortex_perf::{
    BudgetEnforcer, DegradationManager, LatencyProfile, LatencySample, PerfMonitor, SampleOutcome,
    TickPhase,
};
use cortex_reduction::{
    assert_invariant, eligibility, sanitize, Envelope, ReducerConfig, ReductionProvenance,
    ReductionTransport, SterlingClient,
};
use cortex_signals::{SignalProcessor, SignalRules};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Module id under which keep-alive prompts enter the pipeline.
const KEEPALIVE_MODULE: &str = "keepalive";

/// What one tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Tick id.
    pub tick: TickId,
    /// Budget mode the tick ran in.
    pub mode: BudgetMode,
    /// Module dispatched, if any.
    pub dispatched: Option<(ModuleId, Tier)>,
    /// Outcome of the dispatched module.
    pub outcome: Option<SampleOutcome>,
    /// Whether the tick closed inside its deadline.
    pub within_budget: bool,
    /// Whether safe mode was active when the tick closed.
    pub safe_mode: bool,
    /// Needs visible to the tick.
    pub needs_seen: usize,
}

/// A reduction that finished off-tick, waiting to be applied.
struct ReductionCompletion {
    utterance: CandidateUtterance,
    sanitized_text: String,
    provenance: ReductionProvenance,
}

/// How a dispatched module run ended, before outcome accounting.
enum RunEnd {
    Finished(ModuleResult),
    DeadlineExpired { cooperative: bool },
    SafetyPreempted(SafetyAlert),
}

/// The central control loop. Owns every component state; collaborators see
/// only topics and read-only snapshots.
pub struct Arbiter {
    config: CortexConfig,
    clock: Arc<dyn Clock>,
    processor: SignalProcessor,
    registry: ModuleRegistry,
    monitor: PerfMonitor,
    enforcer: BudgetEnforcer,
    degradation: DegradationManager,
    client: Arc<SterlingClient>,
    emitter: TelemetryEmitter,
    tasks_tx: mpsc::Sender<TaskRecord>,
    thoughts: cortex_bus::LossyTopic<ThoughtRecord>,
    needs_topic: cortex_bus::LossyTopic<Vec<Need>>,
    signals_rx: mpsc::Receiver<Signal>,
    safety_rx: mpsc::Receiver<SafetyAlert>,
    activity: ActivityHandle,
    keepalive: KeepAliveController,
    reductions_tx: mpsc::UnboundedSender<ReductionCompletion>,
    reductions_rx: mpsc::UnboundedReceiver<ReductionCompletion>,
    tick_counter: u64,
    invariant_violations: u64,
}

impl Arbiter {
    /// Build an arbiter over the bus with the production clock.
    pub fn new(
        config: CortexConfig,
        bus: &CortexBus,
        transport: Arc<dyn ReductionTransport>,
    ) -> Self {
        Self::with_clock(config, bus, transport, Arc::new(MonotonicClock))
    }

    /// Build an arbiter with an explicit clock.
    pub fn with_clock(
        config: CortexConfig,
        bus: &CortexBus,
        transport: Arc<dyn ReductionTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let emitter = TelemetryEmitter::new(bus.telemetry.clone());
        let client = Arc::new(SterlingClient::with_clock(
            transport,
            ReducerConfig::from_cortex(&config),
            emitter.clone(),
            clock.clone(),
        ));
        let keepalive =
            KeepAliveController::new(KeepAliveConfig::from_cortex(&config), emitter.clone());
        let (reductions_tx, reductions_rx) = mpsc::unbounded_channel();
        Self {
            processor: SignalProcessor::new(SignalRules::default()),
            registry: ModuleRegistry::new(),
            monitor: PerfMonitor::new(
                config.telemetry_topic_capacity,
                emitter.clone(),
            ),
            enforcer: BudgetEnforcer::new(
                config.safemode_threshold,
                config.safemode_recovery,
                emitter.clone(),
            ),
            degradation: DegradationManager::new(),
            client,
            emitter,
            tasks_tx: bus.tasks.publisher(),
            thoughts: bus.thoughts.clone(),
            needs_topic: bus.needs.clone(),
            signals_rx: bus.signals.take_receiver(),
            safety_rx: bus.safety.take_receiver(),
            activity: ActivityHandle::new(),
            keepalive,
            reductions_tx,
            reductions_rx,
            tick_counter: 0,
            invariant_violations: 0,
            config,
            clock,
        }
    }

    /// Replace the default signal rules.
    pub fn with_rules(mut self, rules: SignalRules) -> Self {
        self.processor = SignalProcessor::new(rules);
        self
    }

    /// Register a cognitive module and declare its budget to the monitor.
    pub fn register_module(&mut self, module: Arc<dyn CognitiveModule>) -> Result<()> {
        self.monitor
            .declare_budget(module.id(), module.declared_budget());
        self.registry.register(module)
    }

    /// Handle to the shared activity facts (plan steps, threat, commands).
    pub fn activity_handle(&self) -> ActivityHandle {
        self.activity.clone()
    }

    /// The reduction client, for heartbeat wiring.
    pub fn client(&self) -> Arc<SterlingClient> {
        self.client.clone()
    }

    /// The performance monitor, for profile capture at shutdown.
    pub fn monitor(&self) -> &PerfMonitor {
        &self.monitor
    }

    /// Seed degradation decisions from a persisted latency profile.
    pub fn load_latency_profile(&mut self, profile: &LatencyProfile) {
        let declared = self
            .registry
            .declared()
            .into_iter()
            .map(|(id, _, budget)| (id, budget))
            .collect();
        self.degradation.seed_from_profile(profile, &declared);
    }

    /// An external stimulus for keep-alive acceleration.
    pub fn note_stimulus(&mut self) {
        self.keepalive.note_stimulus();
    }

    /// Runtime invariant violations observed so far.
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    /// Run ticks until the token fires. Signals and safety alerts wake the
    /// loop immediately; otherwise it idles on a short poll that services
    /// finished reductions and the keep-alive controller.
    pub async fn run(&mut self, cancel: CancelToken) -> Result<()> {
        info!(modules = self.registry.len(), "arbiter loop starting");
        let idle_poll = Duration::from_millis(self.config.loop_target_ms);
        let mut signals_open = true;
        let mut safety_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("arbiter loop stopping");
                    return Ok(());
                }
                maybe = self.signals_rx.recv(), if signals_open => {
                    match maybe {
                        Some(signal) => {
                            self.ingest_one(signal);
                            while let Ok(signal) = self.signals_rx.try_recv() {
                                self.ingest_one(signal);
                            }
                            self.tick().await?;
                        }
                        None => signals_open = false,
                    }
                }
                maybe = self.safety_rx.recv(), if safety_open => {
                    match maybe {
                        Some(alert) => {
                            self.note_safety(alert);
                            self.tick().await?;
                        }
                        None => safety_open = false,
                    }
                }
                _ = tokio::time::sleep(idle_poll) => {
                    self.apply_reductions().await?;
                    self.keepalive_poll();
                }
            }
        }
    }

    /// One scheduling tick.
    #[instrument(skip(self), fields(tick = self.tick_counter))]
    pub async fn tick(&mut self) -> Result<TickReport> {
        let tick = TickId(self.tick_counter);
        self.tick_counter += 1;

        self.apply_reductions().await?;
        while let Ok(signal) = self.signals_rx.try_recv() {
            self.ingest_one(signal);
        }
        while let Ok(alert) = self.safety_rx.try_recv() {
            self.note_safety(alert);
        }

        let now = self.clock.now();
        let needs = self.processor.derive(now);
        self.needs_topic.publish(needs.clone());

        let selected = self.select_need(&needs);
        let mode = match &selected {
            Some(need) if need.kind.is_hazard() => BudgetMode::Hazardous,
            _ if self.activity.threat() >= ThreatLevel::High => BudgetMode::Hazardous,
            _ => BudgetMode::Routine,
        };
        let budget = match mode {
            BudgetMode::Hazardous => self.config.hazardous_budget(),
            BudgetMode::Routine => self.config.routine_budget(),
        };
        let window = BudgetWindow::open(now, mode, budget);

        let (dispatched, outcome) = match selected.as_ref() {
            Some(need) => self.dispatch(tick, need, &window).await?,
            None => (None, None),
        };

        let end = self.clock.now();
        let verdict = self.enforcer.finish_tick(tick, &window, end);
        self.degradation.evaluate(tick, &self.monitor);
        let safe_mode = self.enforcer.safe_mode().active;

        self.emitter.emit(
            TelemetryEvent::new(TelemetryKind::TickSummary {
                mode,
                dispatched_tier: dispatched.as_ref().map(|(_, t)| t.index()),
                consumed_ms: window.consumed(end).as_millis() as u64,
                within_budget: verdict.within_budget,
            })
            .with_tick(tick)
            .degraded(safe_mode),
        );

        Ok(TickReport {
            tick,
            mode,
            dispatched,
            outcome,
            within_budget: verdict.within_budget,
            safe_mode,
            needs_seen: needs.len(),
        })
    }

    /// Highest-urgency need; ties break to the cheaper tier, then the
    /// older need, then the kind enumeration order.
    fn select_need(&self, needs: &[Need]) -> Option<Need> {
        needs
            .iter()
            .min_by(|a, b| {
                b.urgency
                    .total_cmp(&a.urgency)
                    .then_with(|| self.tier_rank(a.kind).cmp(&self.tier_rank(b.kind)))
                    .then_with(|| a.generated_at.cmp(&b.generated_at))
                    .then_with(|| a.kind.cmp(&b.kind))
            })
            .cloned()
    }

    fn tier_rank(&self, kind: SignalKind) -> u8 {
        self.registry
            .min_tier_for(kind)
            .map_or(u8::MAX, |t| t.index())
    }

    /// Walk the candidate ladder for one need.
    async fn dispatch(
        &mut self,
        tick: TickId,
        need: &Need,
        window: &BudgetWindow,
    ) -> Result<(Option<(ModuleId, Tier)>, Option<SampleOutcome>)> {
        let safe = self.enforcer.safe_mode();
        let hazardous = window.mode == BudgetMode::Hazardous;
        let candidates = self.registry.candidates(
            need,
            |tier| safe.allows(tier),
            |id| hazardous && self.degradation.is_degraded(id, tick),
        );
        if candidates.is_empty() {
            debug!(kind = %need.kind, "no dispatchable module for need");
            return Ok((None, None));
        }

        for module in candidates {
            let id = module.id();
            let tier = module.tier();
            let started = self.clock.now();
            if window.deadline.is_expired(started) {
                break;
            }

            self.registry.set_state(&id, ModuleState::Running);
            let end = self.run_module(tick, &module, need, window).await;
            let finished = self.clock.now();

            match end {
                RunEnd::Finished(ModuleResult::Utterance(text)) => {
                    self.record(&id, started, finished, SampleOutcome::Completed);
                    self.registry.set_state(&id, ModuleState::Idle);
                    self.queue_reduction(id.clone(), text);
                    return Ok((Some((id, tier)), Some(SampleOutcome::Completed)));
                }
                RunEnd::Finished(ModuleResult::Quiet) => {
                    self.record(&id, started, finished, SampleOutcome::Completed);
                    self.registry.set_state(&id, ModuleState::Idle);
                    return Ok((Some((id, tier)), Some(SampleOutcome::Completed)));
                }
                RunEnd::Finished(ModuleResult::Failed(detail)) => {
                    warn!(module = %id, %detail, "module failed; trying next tier");
                    self.record(&id, started, finished, SampleOutcome::Errored);
                    self.registry.set_state(&id, ModuleState::Idle);
                    // Retry the need at the next tier down the ladder.
                    continue;
                }
                RunEnd::DeadlineExpired { cooperative } => {
                    self.record(&id, started, finished, SampleOutcome::TimedOut);
                    let state = if cooperative {
                        ModuleState::Preempted
                    } else {
                        warn!(module = %id, "non-cooperative module abandoned");
                        ModuleState::Degraded
                    };
                    self.registry.set_state(&id, state);
                    return Ok((Some((id, tier)), Some(SampleOutcome::TimedOut)));
                }
                RunEnd::SafetyPreempted(alert) => {
                    self.record(&id, started, finished, SampleOutcome::Preempted);
                    self.registry.set_state(&id, ModuleState::Preempted);
                    self.note_safety(alert);
                    let reflex = self.dispatch_reflex(tick, window).await?;
                    return Ok((reflex.or(Some((id, tier))), Some(SampleOutcome::Preempted)));
                }
            }
        }
        Ok((None, None))
    }

    /// Run one module against the tick deadline and the safety topic.
    async fn run_module(
        &mut self,
        tick: TickId,
        module: &Arc<dyn CognitiveModule>,
        need: &Need,
        window: &BudgetWindow,
    ) -> RunEnd {
        let token = CancelToken::new();
        let ctx = TickContext {
            tick,
            deadline: window.deadline,
            cancel: token.clone(),
        };
        let runner = Arc::clone(module);
        let need = need.clone();
        let mut handle = tokio::spawn(async move { runner.handle(&need, ctx).await });

        let now = self.clock.now();
        let budget_left = window.deadline.remaining(now);
        let sleep = tokio::time::sleep(budget_left);
        tokio::pin!(sleep);
        // Warn point: 80% of the full window, measured from its start.
        let total = window.deadline.at().saturating_duration_since(window.start);
        let warn_at = window.start + total.mul_f64(0.8);
        let warn_sleep = tokio::time::sleep(warn_at.saturating_duration_since(now));
        tokio::pin!(warn_sleep);
        let mut warned = false;
        let mut watch_safety = module.tier() != Tier::Reflex;

        loop {
            tokio::select! {
                _ = &mut warn_sleep, if !warned => {
                    warned = true;
                    let at = self.clock.now();
                    if self.enforcer.assess(window, at) != TickPhase::Fresh {
                        self.emitter.emit(
                            TelemetryEvent::new(TelemetryKind::BudgetWarning {
                                module: Some(module.id().to_string()),
                                fraction: window.fraction_consumed(at),
                            })
                            .with_tick(tick),
                        );
                    }
                }
                joined = &mut handle => {
                    return RunEnd::Finished(joined.unwrap_or_else(|e| {
                        ModuleResult::Failed(format!("module task join error: {e}"))
                    }));
                }
                _ = &mut sleep => {
                    token.cancel();
                    let grace = Duration::from_millis(BUDGET_SLACK_MS);
                    match tokio::time::timeout(grace, &mut handle).await {
                        // Cooperative: it stopped when asked. The late
                        // result is discarded either way.
                        Ok(_) => return RunEnd::DeadlineExpired { cooperative: true },
                        Err(_) => {
                            handle.abort();
                            return RunEnd::DeadlineExpired { cooperative: false };
                        }
                    }
                }
                maybe = self.safety_rx.recv(), if watch_safety => {
                    match maybe {
                        Some(alert) if alert.threat >= ThreatLevel::High => {
                            token.cancel();
                            handle.abort();
                            return RunEnd::SafetyPreempted(alert);
                        }
                        Some(alert) => self.note_safety(alert),
                        None => watch_safety = false,
                    }
                }
            }
        }
    }

    /// Dispatch the reflex tier for the highest-urgency hazard need after a
    /// mid-tick safety preemption.
    async fn dispatch_reflex(
        &mut self,
        tick: TickId,
        window: &BudgetWindow,
    ) -> Result<Option<(ModuleId, Tier)>> {
        let now = self.clock.now();
        let needs = self.processor.derive(now);
        let Some(need) = needs
            .into_iter()
            .filter(|n| n.kind.is_hazard())
            .max_by(|a, b| a.urgency.total_cmp(&b.urgency))
        else {
            return Ok(None);
        };

        let candidates = self
            .registry
            .candidates(&need, |tier| tier == Tier::Reflex, |_| false);
        let Some(module) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let id = module.id();
        let started = self.clock.now();
        let end = self.run_module(tick, &module, &need, window).await;
        let finished = self.clock.now();
        match end {
            RunEnd::Finished(ModuleResult::Utterance(text)) => {
                self.record(&id, started, finished, SampleOutcome::Completed);
                self.queue_reduction(id.clone(), text);
            }
            RunEnd::Finished(_) => {
                self.record(&id, started, finished, SampleOutcome::Completed);
            }
            RunEnd::DeadlineExpired { .. } => {
                self.record(&id, started, finished, SampleOutcome::TimedOut);
            }
            RunEnd::SafetyPreempted(alert) => {
                // Reflex runs are never preempted by further alerts; record
                // the alert and let the next tick handle it.
                self.record(&id, started, finished, SampleOutcome::Completed);
                self.note_safety(alert);
            }
        }
        self.registry.set_state(&id, ModuleState::Idle);
        Ok(Some((id, Tier::Reflex)))
    }

    /// Queue one utterance through sanitize → reduce, off-tick. The
    /// completion is applied at the start of a later tick, so no tick ever
    /// waits on the semantic authority.
    fn queue_reduction(&mut self, source: ModuleId, raw_text: String) {
        let now = self.clock.now();
        let utterance = CandidateUtterance::new(source, raw_text, now);
        let outcome = sanitize(&utterance.raw_text);
        let envelope = Envelope::build(&outcome, self.context_digest());
        debug!(
            envelope = %envelope.envelope_id,
            module = %utterance.source_module,
            markers = envelope.markers.len(),
            "queueing reduction"
        );

        let client = self.client.clone();
        let tx = self.reductions_tx.clone();
        let sanitized_text = outcome.sanitized_text.clone();
        tokio::spawn(async move {
            let provenance = client.reduce(&envelope).await;
            let _ = tx.send(ReductionCompletion {
                utterance,
                sanitized_text,
                provenance,
            });
        });
    }

    /// Apply every finished reduction: gate, then task or thought.
    async fn apply_reductions(&mut self) -> Result<()> {
        while let Ok(done) = self.reductions_rx.try_recv() {
            let decision = eligibility(Some(&done.provenance));
            if let Err(violation) = assert_invariant(Some(&done.provenance), &decision) {
                self.invariant_violations += 1;
                error!(error = %violation, "eligibility invariant violated; entering safe mode");
                self.emitter.emit(
                    TelemetryEvent::new(TelemetryKind::InvariantViolation {
                        detail: violation.to_string(),
                    })
                    .with_envelope(done.provenance.envelope_id.clone())
                    .with_error(ErrorClass::InvariantViolation)
                    .degraded(true),
                );
                self.enforcer.force_safe_mode(
                    TickId(self.tick_counter),
                    self.clock.now(),
                    "eligibility invariant violated",
                );
                continue;
            }

            if decision.convert_eligible {
                let record = TaskRecord {
                    task_id: Uuid::new_v4(),
                    source_envelope_id: done.provenance.envelope_id.clone(),
                    reducer_result: done
                        .provenance
                        .reducer_result
                        .clone()
                        .unwrap_or(serde_json::Value::Null),
                    source_module: done.utterance.source_module.clone(),
                    at: Utc::now(),
                };
                self.tasks_tx
                    .send(record)
                    .await
                    .map_err(|_| ArbiterError::Bus(cortex_bus::BusError::Closed("tasks")))?;
                self.activity.note_task_conversion(self.clock.now());
            } else {
                self.thoughts.publish(ThoughtRecord {
                    utterance_id: done.utterance.id,
                    source_module: done.utterance.source_module.clone(),
                    envelope_id: Some(done.provenance.envelope_id.clone()),
                    text: done.sanitized_text,
                    reason: decision.reasoning.as_str().to_string(),
                    block_reason: done.provenance.block_reason.clone(),
                    at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    /// Evaluate the keep-alive controller; an idle tick enters the same
    /// reduction pipeline as any module utterance.
    fn keepalive_poll(&mut self) {
        let now = self.clock.now();
        let activity = self.activity.clone();
        match self.keepalive.poll(now, &activity) {
            KeepAliveDecision::Tick { prompt } => {
                self.queue_reduction(ModuleId::new(KEEPALIVE_MODULE), prompt);
            }
            KeepAliveDecision::NotDue
            | KeepAliveDecision::SkipNotIdle { .. }
            | KeepAliveDecision::RateLimited => {}
        }
    }

    fn ingest_one(&mut self, signal: Signal) {
        if let Err(e) = self.processor.ingest(&signal) {
            self.emitter.emit(
                TelemetryEvent::new(TelemetryKind::SignalRejected {
                    source: signal.source.clone(),
                    detail: e.to_string(),
                })
                .with_error(e.class()),
            );
        }
    }

    fn note_safety(&mut self, alert: SafetyAlert) {
        self.activity.set_threat(alert.threat);
        if let Some(signal) = alert.signal {
            self.ingest_one(signal);
        }
    }

    fn record(&mut self, id: &ModuleId, started: Instant, finished: Instant, outcome: SampleOutcome) {
        self.monitor.record(LatencySample {
            module: id.clone(),
            started_at: started,
            finished_at: finished,
            outcome,
        });
    }

    /// Opaque digest of the situation frame carried on every envelope.
    fn context_digest(&self) -> String {
        let frame = format!(
            "tick:{};threat:{:?};plan_steps:{}",
            self.tick_counter,
            self.activity.threat(),
            self.activity.active_plan_steps(),
        );
        let digest = Sha256::digest(frame.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

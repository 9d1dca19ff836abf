//! Shared fixture: a scripted semantic authority and stock test modules.
//! Real collaborators, no mocks: the arbiter under test runs against the
//! actual bus, processor, monitor, enforcer, and client.

// Each integration binary uses a different slice of this fixture.
#![allow(dead_code)]

use async_trait::async_trait;
use cortex_arbiter::{Arbiter, Capability, CognitiveModule, ModuleResult, TickContext};
use cortex_bus::CortexBus;
use cortex_core::{CortexConfig, ModuleId, Need, SignalKind, Tier};
use cortex_reduction::{
    Envelope, ReductionResponse, ReductionTransport, TransportError, ENVELOPE_SCHEMA_VERSION,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the scripted authority behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Reachable; executable iff the envelope carries a goal marker.
    Healthy,
    /// Unreachable.
    Down,
}

/// The semantic authority stand-in. It is allowed to interpret markers;
/// interpretation is its job, and only its job.
pub struct ScriptedAuthority {
    mode: AuthorityMode,
    calls: AtomicU64,
}

impl ScriptedAuthority {
    pub fn new(mode: AuthorityMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReductionTransport for ScriptedAuthority {
    async fn send(&self, envelope: &Envelope) -> Result<ReductionResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.mode {
            AuthorityMode::Down => {
                Err(TransportError::Unreachable("connection refused".into()))
            }
            AuthorityMode::Healthy => {
                let executable = !envelope.markers.is_empty();
                Ok(ReductionResponse {
                    envelope_id: envelope.envelope_id.clone(),
                    schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
                    reducer_result: json!({
                        "markers": envelope.markers,
                        "frame": envelope.context_digest,
                    }),
                    is_executable: executable,
                    block_reason: (!executable)
                        .then(|| "no explicit goal authorized".to_string()),
                    timings: Default::default(),
                })
            }
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        match self.mode {
            AuthorityMode::Down => Err(TransportError::Unreachable("connection refused".into())),
            AuthorityMode::Healthy => Ok(()),
        }
    }
}

/// Module that always utters the same text.
pub struct Speaker {
    pub id: &'static str,
    pub tier: Tier,
    pub kind: SignalKind,
    pub text: &'static str,
}

#[async_trait]
impl CognitiveModule for Speaker {
    fn id(&self) -> ModuleId {
        ModuleId::new(self.id)
    }
    fn tier(&self) -> Tier {
        self.tier
    }
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::for_need(self.kind)]
    }
    async fn handle(&self, _need: &Need, _ctx: TickContext) -> ModuleResult {
        ModuleResult::Utterance(self.text.to_string())
    }
}

/// Module that sleeps through its budget. Cooperative variants stop when
/// cancelled; non-cooperative ones ignore the token entirely.
pub struct Sleeper {
    pub id: &'static str,
    pub tier: Tier,
    pub kind: SignalKind,
    pub sleep: Duration,
    pub cooperative: bool,
}

#[async_trait]
impl CognitiveModule for Sleeper {
    fn id(&self) -> ModuleId {
        ModuleId::new(self.id)
    }
    fn tier(&self) -> Tier {
        self.tier
    }
    fn declared_budget(&self) -> Duration {
        // Declares its honest worst case, so its tier stays stable and the
        // tick-level budget machinery is what gets exercised.
        self.sleep
    }
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::for_need(self.kind)]
    }
    async fn handle(&self, _need: &Need, ctx: TickContext) -> ModuleResult {
        if self.cooperative {
            tokio::select! {
                _ = tokio::time::sleep(self.sleep) => ModuleResult::Quiet,
                _ = ctx.cancel.cancelled() => ModuleResult::Quiet,
            }
        } else {
            tokio::time::sleep(self.sleep).await;
            ModuleResult::Quiet
        }
    }
}

/// Reflex that counts its invocations.
pub struct CountingReflex {
    pub invocations: Arc<AtomicU64>,
}

#[async_trait]
impl CognitiveModule for CountingReflex {
    fn id(&self) -> ModuleId {
        ModuleId::new("counting-reflex")
    }
    fn tier(&self) -> Tier {
        Tier::Reflex
    }
    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::for_need(SignalKind::Safety),
            Capability::for_need(SignalKind::Health),
        ]
    }
    async fn handle(&self, _need: &Need, _ctx: TickContext) -> ModuleResult {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        ModuleResult::Quiet
    }
}

/// Build an arbiter over a fresh bus and a scripted authority.
pub fn build(
    config: CortexConfig,
    mode: AuthorityMode,
) -> (Arbiter, CortexBus, Arc<ScriptedAuthority>) {
    let authority = ScriptedAuthority::new(mode);
    let bus = CortexBus::new(&config);
    let arbiter = Arbiter::new(config, &bus, authority.clone());
    (arbiter, bus, authority)
}

/// Run `n` ticks with a short pause between them, letting the off-tick
/// reduction pipeline complete and be applied.
pub async fn pump(arbiter: &mut Arbiter, n: usize) {
    for _ in 0..n {
        arbiter.tick().await.expect("tick failed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

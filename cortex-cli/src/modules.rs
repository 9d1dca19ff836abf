//! Stock cognitive modules shipped with the daemon.
//!
//! These live outside the core boundary: they produce candidate text and
//! nothing else. Whether any of it becomes a task is decided entirely by
//! the semantic authority behind the reduction gate.

use async_trait::async_trait;
use cortex_arbiter::{Capability, CognitiveModule, ModuleResult, TickContext};
use cortex_core::{ModuleId, Need, SignalKind, Tier};

/// Tier-0 reflex: reports an immediate hazard.
pub struct ReflexGuard;

#[async_trait]
impl CognitiveModule for ReflexGuard {
    fn id(&self) -> ModuleId {
        ModuleId::new("reflex-guard")
    }

    fn tier(&self) -> Tier {
        Tier::Reflex
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::for_need(SignalKind::Health),
            Capability::for_need(SignalKind::Safety),
        ]
    }

    async fn handle(&self, need: &Need, _ctx: TickContext) -> ModuleResult {
        ModuleResult::Utterance(format!(
            "Immediate {} pressure at urgency {:.2}; trend {:?}.",
            need.kind, need.urgency, need.trend
        ))
    }
}

/// Tier-1 reactive responder: narrates the pressing need.
pub struct ReactiveResponder;

#[async_trait]
impl CognitiveModule for ReactiveResponder {
    fn id(&self) -> ModuleId {
        ModuleId::new("reactive-responder")
    }

    fn tier(&self) -> Tier {
        Tier::Reactive
    }

    fn capabilities(&self) -> Vec<Capability> {
        SignalKind::ALL.iter().map(|k| Capability::for_need(*k)).collect()
    }

    async fn handle(&self, need: &Need, ctx: TickContext) -> ModuleResult {
        if ctx.cancel.is_cancelled() {
            return ModuleResult::Quiet;
        }
        ModuleResult::Utterance(format!(
            "Current {} level calls for attention (urgency {:.2}, {} contributing signals).",
            need.kind,
            need.urgency,
            need.evidence.len()
        ))
    }
}

//! Module registry and tiering.
//!
//! Cognitive modules register by id and tier and declare capabilities as
//! opaque symbolic tokens. The registry answers one question for the
//! arbiter: for this need, which modules are candidates, in ladder order?

use crate::{ArbiterError, Result};
use async_trait::async_trait;
use cortex_core::{CancelToken, Deadline, ModuleId, Need, SignalKind, TickId, Tier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Symbolic capability token. The registry matches tokens byte-for-byte;
/// their meaning lives with the modules that declare them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability(String);

impl Capability {
    /// A capability from a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The routing token for needs of one signal kind.
    pub fn for_need(kind: SignalKind) -> Self {
        Self(format!("need:{kind}"))
    }

    /// Borrow the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Ready for dispatch.
    Idle,
    /// Currently dispatched.
    Running,
    /// Cancelled mid-flight this tick.
    Preempted,
    /// Abandoned a non-cooperative run or tripped the degradation policy.
    Degraded,
    /// Not dispatchable.
    Disabled,
}

/// Everything a module gets for one dispatch.
#[derive(Debug, Clone)]
pub struct TickContext {
    /// The tick this dispatch belongs to.
    pub tick: TickId,
    /// The tick deadline. Work past this point is discarded.
    pub deadline: Deadline,
    /// Cooperative cancellation. Modules must check this at suspension
    /// points; a module that never does is abandoned and marked degraded.
    pub cancel: CancelToken,
}

/// What a dispatched module produced.
#[derive(Debug, Clone)]
pub enum ModuleResult {
    /// A candidate utterance for the reduction pipeline.
    Utterance(String),
    /// Handled the need without anything to say.
    Quiet,
    /// The module failed. The arbiter records it and tries the next tier.
    Failed(String),
}

/// A cognitive module behind the preemption ladder.
#[async_trait]
pub trait CognitiveModule: Send + Sync {
    /// Stable id.
    fn id(&self) -> ModuleId;

    /// Ladder tier.
    fn tier(&self) -> Tier;

    /// Declared per-dispatch latency budget. Defaults to the tier ceiling;
    /// the deliberative tier defaults to the routine ceiling for
    /// accounting purposes only (it stays cancellable at any time).
    fn declared_budget(&self) -> Duration {
        self.tier()
            .latency_ceiling()
            .unwrap_or(Duration::from_millis(200))
    }

    /// Capability tokens this module serves.
    fn capabilities(&self) -> Vec<Capability>;

    /// Handle one need. Must respect `ctx.cancel` at suspension points.
    async fn handle(&self, need: &Need, ctx: TickContext) -> ModuleResult;
}

struct Registered {
    module: Arc<dyn CognitiveModule>,
    state: ModuleState,
}

/// The registry. Owned by the arbiter; state changes happen only on the
/// arbiter's thread.
pub struct ModuleRegistry {
    modules: Vec<Registered>,
    by_id: HashMap<ModuleId, usize>,
}

impl ModuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Register a module. Ids must be unique.
    pub fn register(&mut self, module: Arc<dyn CognitiveModule>) -> Result<()> {
        let id = module.id();
        if self.by_id.contains_key(&id) {
            return Err(ArbiterError::DuplicateModule { id });
        }
        self.by_id.insert(id, self.modules.len());
        self.modules.push(Registered {
            module,
            state: ModuleState::Idle,
        });
        Ok(())
    }

    /// Candidate modules for a need, reflex first, then down the ladder.
    /// Filtered to tiers the caller allows and to dispatchable states.
    /// Within a tier, registration order is preserved (stable).
    pub fn candidates(
        &self,
        need: &Need,
        allows: impl Fn(Tier) -> bool,
        exclude: impl Fn(&ModuleId) -> bool,
    ) -> Vec<Arc<dyn CognitiveModule>> {
        let wanted = Capability::for_need(need.kind);
        let mut found: Vec<&Registered> = self
            .modules
            .iter()
            .filter(|r| {
                matches!(r.state, ModuleState::Idle | ModuleState::Preempted)
                    && allows(r.module.tier())
                    && !exclude(&r.module.id())
                    && r.module.capabilities().contains(&wanted)
            })
            .collect();
        found.sort_by_key(|r| r.module.tier());
        found.iter().map(|r| Arc::clone(&r.module)).collect()
    }

    /// The lowest tier any registered module offers for a need, ignoring
    /// transient state. Used for urgency tie-breaking.
    pub fn min_tier_for(&self, kind: SignalKind) -> Option<Tier> {
        let wanted = Capability::for_need(kind);
        self.modules
            .iter()
            .filter(|r| r.state != ModuleState::Disabled)
            .filter(|r| r.module.capabilities().contains(&wanted))
            .map(|r| r.module.tier())
            .min()
    }

    /// Current state of a module.
    pub fn state(&self, id: &ModuleId) -> Option<ModuleState> {
        self.by_id.get(id).map(|i| self.modules[*i].state)
    }

    /// Set the state of a module. Unknown ids are ignored.
    pub fn set_state(&mut self, id: &ModuleId, state: ModuleState) {
        if let Some(i) = self.by_id.get(id) {
            self.modules[*i].state = state;
        }
    }

    /// All registered module ids with their tiers and declared budgets.
    pub fn declared(&self) -> Vec<(ModuleId, Tier, Duration)> {
        self.modules
            .iter()
            .map(|r| (r.module.id(), r.module.tier(), r.module.declared_budget()))
            .collect()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct FakeModule {
        id: &'static str,
        tier: Tier,
        kinds: Vec<SignalKind>,
    }

    #[async_trait]
    impl CognitiveModule for FakeModule {
        fn id(&self) -> ModuleId {
            ModuleId::new(self.id)
        }
        fn tier(&self) -> Tier {
            self.tier
        }
        fn capabilities(&self) -> Vec<Capability> {
            self.kinds.iter().map(|k| Capability::for_need(*k)).collect()
        }
        async fn handle(&self, _need: &Need, _ctx: TickContext) -> ModuleResult {
            ModuleResult::Quiet
        }
    }

    fn need(kind: SignalKind) -> Need {
        Need {
            kind,
            urgency: 0.5,
            trend: cortex_core::Trend::Stable,
            generated_at: Instant::now(),
            evidence: Vec::new(),
        }
    }

    fn registry() -> ModuleRegistry {
        let mut r = ModuleRegistry::new();
        r.register(Arc::new(FakeModule {
            id: "planner",
            tier: Tier::Hierarchical,
            kinds: vec![SignalKind::Hunger, SignalKind::Curiosity],
        }))
        .unwrap();
        r.register(Arc::new(FakeModule {
            id: "reflex",
            tier: Tier::Reflex,
            kinds: vec![SignalKind::Safety, SignalKind::Health],
        }))
        .unwrap();
        r.register(Arc::new(FakeModule {
            id: "reactive",
            tier: Tier::Reactive,
            kinds: vec![SignalKind::Hunger, SignalKind::Safety],
        }))
        .unwrap();
        r
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut r = registry();
        let err = r
            .register(Arc::new(FakeModule {
                id: "reflex",
                tier: Tier::Reflex,
                kinds: vec![],
            }))
            .unwrap_err();
        assert!(matches!(err, ArbiterError::DuplicateModule { .. }));
    }

    #[test]
    fn candidates_come_back_in_ladder_order() {
        let r = registry();
        let c = r.candidates(&need(SignalKind::Hunger), |_| true, |_| false);
        let ids: Vec<String> = c.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["reactive", "planner"]);
    }

    #[test]
    fn safe_mode_filter_removes_high_tiers() {
        let r = registry();
        let c = r.candidates(
            &need(SignalKind::Hunger),
            |tier| tier <= Tier::Reactive,
            |_| false,
        );
        let ids: Vec<String> = c.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["reactive"]);
    }

    #[test]
    fn degraded_exclusion_is_honored() {
        let r = registry();
        let reactive = ModuleId::new("reactive");
        let c = r.candidates(&need(SignalKind::Hunger), |_| true, |id| *id == reactive);
        let ids: Vec<String> = c.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["planner"]);
    }

    #[test]
    fn disabled_modules_never_surface() {
        let mut r = registry();
        r.set_state(&ModuleId::new("reactive"), ModuleState::Disabled);
        let c = r.candidates(&need(SignalKind::Hunger), |_| true, |_| false);
        let ids: Vec<String> = c.iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["planner"]);
    }

    #[test]
    fn min_tier_reflects_capabilities() {
        let r = registry();
        assert_eq!(r.min_tier_for(SignalKind::Safety), Some(Tier::Reflex));
        assert_eq!(r.min_tier_for(SignalKind::Hunger), Some(Tier::Reactive));
        assert_eq!(r.min_tier_for(SignalKind::Social), None);
    }
}

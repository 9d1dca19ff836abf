//! # Cortex Arbiter - The Control Loop
//!
//! The central scheduler. One tick is one scheduling decision:
//!
//! 1. apply any finished semantic reductions (tasks out, thoughts out)
//! 2. drain signals into the processor, derive needs
//! 3. select the highest-urgency need (ties: lower tier, older, kind order)
//! 4. choose the budget mode: hazardous 50 ms for hazard needs or high
//!    threat, routine 200 ms otherwise
//! 5. dispatch down the preemption ladder, restricted to safe-mode tiers;
//!    a safety alert arriving mid-dispatch preempts lower tiers before the
//!    reflex runs
//! 6. route any candidate utterance through sanitize → reduce →
//!    eligibility; reductions complete off-tick so no tick ever waits on
//!    the semantic authority
//! 7. record latency, close the budget window, evaluate degradation
//!
//! The keep-alive controller feeds intention checks through the same
//! pipeline, but only when the loop is idle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arbiter;
pub mod keepalive;
pub mod registry;

pub use arbiter::{Arbiter, TickReport};
pub use keepalive::{
    ActivityHandle, KeepAliveConfig, KeepAliveController, KeepAliveDecision,
};
pub use registry::{
    Capability, CognitiveModule, ModuleRegistry, ModuleResult, ModuleState, TickContext,
};

use cortex_bus::BusError;
use cortex_core::ModuleId;
use thiserror::Error;

/// Result alias for arbiter operations.
pub type Result<T> = std::result::Result<T, ArbiterError>;

/// Errors raised by the arbiter.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// A module id was registered twice.
    #[error("module {id} already registered")]
    DuplicateModule {
        /// The colliding id.
        id: ModuleId,
    },
    /// A bus topic failed; safety overflow here is fatal by contract.
    #[error(transparent)]
    Bus(#[from] BusError),
}

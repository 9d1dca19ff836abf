//! # Cortex Core - Shared Foundation
//!
//! Foundation crate for the cortex cognitive control core. Everything the
//! other crates agree on lives here:
//!
//! - Monotonic clock abstraction, deadlines, and cancellation tokens
//! - Bounded ring buffers (every history in the system is capped)
//! - The shared vocabulary: signals, needs, tiers, budget modes, outcomes
//! - Environment-driven configuration
//! - The error taxonomy used by telemetry
//!
//! ## Time discipline
//!
//! All scheduling decisions use monotonic time (`Instant` via the [`Clock`]
//! trait). Wall-clock time (`chrono`) appears only inside telemetry events.
//!
//! ## Boundary discipline
//!
//! This crate defines *no* semantic vocabulary: no action names, no verb
//! tables, no predicate mappings. Candidate utterances are opaque text and
//! marker spans are carried verbatim. Interpretation belongs to the external
//! semantic authority behind the reduction client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod ring;
pub mod types;

pub use clock::{CancelToken, Clock, Deadline, ManualClock, MonotonicClock};
pub use config::CortexConfig;
pub use error::{CoreError, ErrorClass, Result};
pub use ring::BoundedRing;
pub use types::{
    BudgetMode, BudgetWindow, CandidateUtterance, ModuleId, Need, Signal, SignalKind, SignalRef,
    ThreatLevel, TickId, Tier, Trend,
};

/// Telemetry schema version emitted with every structured event.
pub const TELEMETRY_SCHEMA_VERSION: &str = "1";

/// Slack allowed on tick deadline assertions (scheduler jitter), in ms.
pub const BUDGET_SLACK_MS: u64 = 2;

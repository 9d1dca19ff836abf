//! # Cortex Reduction - The Fail-Closed Boundary
//!
//! Everything between a candidate utterance and an executable task:
//!
//! 1. [`sanitize`](sanitize::sanitize): deterministic, versioned text
//!    cleanup. Evidence transform only, never semantic.
//! 2. [`Envelope`]: the immutable bundle handed to the external semantic
//!    authority (Sterling), keyed by a stable 16-hex digest.
//! 3. [`SterlingClient`]: the only gateway to the authority, with per-call
//!    timeout, circuit breaker, bounded concurrency, response correlation.
//!    Every failure synthesizes a well-formed provenance with
//!    `sterling_processed = false` so the pipeline proceeds fail-closed,
//!    never fail-open.
//! 4. [`eligibility`](eligibility::eligibility): the single choke point
//!    that turns a provenance into a conversion decision:
//!    `convert_eligible ⇔ sterling_processed ∧ is_executable`.
//!
//! The core never interprets reducer output beyond the two booleans. No
//! action classification, verb normalization, or predicate mapping exists
//! on this side of the boundary; marker spans travel verbatim.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod eligibility;
pub mod envelope;
pub mod provenance;
pub mod sanitize;

pub use client::{
    Backoff, CircuitStats, ClientState, ReducerConfig, ReductionTransport, SterlingClient,
    TransportError,
};
pub use eligibility::{assert_invariant, eligibility, EligibilityDecision, EligibilityReasoning};
pub use envelope::{Envelope, ENVELOPE_SCHEMA_VERSION};
pub use provenance::{ReductionProvenance, ReductionResponse, ResponseTimings};
pub use sanitize::{sanitize, SanitizeFlags, SanitizeOutcome, SANITIZER_VERSION};

use cortex_core::ErrorClass;
use thiserror::Error;

/// Result alias for reduction operations.
pub type Result<T> = std::result::Result<T, ReductionError>;

/// Errors raised at the reduction boundary.
///
/// `reduce` itself never returns an error (fail-closed synthesis); these
/// surface through validation helpers and the invariant self-check.
#[derive(Debug, Error)]
pub enum ReductionError {
    /// The authority's response failed schema validation or correlation.
    /// Treated as unavailability plus a violation telemetry event.
    #[error("malformed reducer response: {detail}")]
    Malformed {
        /// What was wrong.
        detail: String,
    },
    /// The eligibility self-check failed. Fatal for the tick.
    #[error("eligibility invariant violated: {detail}")]
    InvariantViolation {
        /// What the check observed.
        detail: String,
    },
}

impl ReductionError {
    /// Classification for telemetry.
    pub fn class(&self) -> ErrorClass {
        match self {
            ReductionError::Malformed { .. } => ErrorClass::ReducerMalformed,
            ReductionError::InvariantViolation { .. } => ErrorClass::InvariantViolation,
        }
    }
}

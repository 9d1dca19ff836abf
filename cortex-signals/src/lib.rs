//! # Cortex Signals - Needs from Homeostatic Pressure
//!
//! Converts raw homeostatic signals into needs:
//!
//! 1. **Normalize**: clamp raw intensity to [0,1], optional exponential
//!    smoothing per kind.
//! 2. **Track**: bounded trend history per kind; short-window mean vs
//!    long-window mean classifies the trend.
//! 3. **Derive**: declarative per-kind rules with hysteresis produce needs.
//!    A need activates at `trigger_intensity` and stays active until the
//!    level falls below `hysteresis_low`, so an oscillating signal cannot
//!    flap the need on and off.
//!
//! `ingest` is O(1); `derive` is O(#kinds). Given the same signal stream
//! the output is identical: derivation iterates kinds in their declared
//! order and never consults wall-clock time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod processor;
pub mod rules;

pub use processor::{SignalProcessor, SignalStats};
pub use rules::{KindRule, NeedRule, NormalizationRule, SignalRules};

use cortex_core::ErrorClass;
use thiserror::Error;

/// Result alias for signal operations.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors raised by the signal processor.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Intensity was NaN or infinite. The signal is rejected; the stream
    /// continues.
    #[error("invalid signal: {kind} intensity {intensity} is not finite")]
    InvalidSignal {
        /// Kind of the rejected signal.
        kind: cortex_core::SignalKind,
        /// The offending intensity.
        intensity: f64,
    },
}

impl SignalError {
    /// Classification for telemetry.
    pub fn class(&self) -> ErrorClass {
        match self {
            SignalError::InvalidSignal { .. } => ErrorClass::InvalidSignal,
        }
    }
}

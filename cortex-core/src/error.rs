//! Error taxonomy shared across the control core.
//!
//! Each crate defines its own `thiserror` enum; [`ErrorClass`] is the
//! cross-crate classification that telemetry events carry. Errors are never
//! silent: every one produces at least one structured telemetry event.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Classification of an error, carried in telemetry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Signal rejected by the processor (NaN/∞ intensity).
    InvalidSignal,
    /// A module raised during execution.
    ModuleError,
    /// A module exceeded its deadline and was preempted.
    ModuleTimeout,
    /// Semantic authority unreachable or circuit open.
    ReducerUnavailable,
    /// Semantic authority response failed schema validation.
    ReducerMalformed,
    /// A tick exceeded its deadline.
    BudgetViolation,
    /// The eligibility self-check failed. Fatal for the tick.
    InvariantViolation,
    /// Startup configuration error.
    ConfigError,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::InvalidSignal => "invalid_signal",
            ErrorClass::ModuleError => "module_error",
            ErrorClass::ModuleTimeout => "module_timeout",
            ErrorClass::ReducerUnavailable => "reducer_unavailable",
            ErrorClass::ReducerMalformed => "reducer_malformed",
            ErrorClass::BudgetViolation => "budget_violation",
            ErrorClass::InvariantViolation => "invariant_violation",
            ErrorClass::ConfigError => "config_error",
        };
        f.write_str(name)
    }
}

/// Errors raised by the foundation crate itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration variable failed to parse. Startup only; the process
    /// exits with code 64.
    #[error("configuration error: {name}={value:?}: {reason}")]
    Config {
        /// Environment variable name.
        name: String,
        /// Offending value, if present.
        value: Option<String>,
        /// Why it was rejected.
        reason: String,
    },
}

impl CoreError {
    /// Classification for telemetry.
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Config { .. } => ErrorClass::ConfigError,
        }
    }
}

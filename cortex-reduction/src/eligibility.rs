//! The eligibility gate: the only place `convert_eligible` is computed.
//!
//! Default-deny. A candidate utterance becomes an executable task if and
//! only if the semantic authority processed its envelope AND judged it
//! executable. Absence of a reduction, an unreachable authority, or a
//! malformed response all gate to "not eligible", explicit goal markers
//! included.
//!
//! [`assert_invariant`] re-checks a decision against its provenance. It is
//! used by tests and by a runtime self-check in the arbiter; a failure is
//! fatal for the tick and engages safe mode.

use crate::provenance::ReductionProvenance;
use crate::{ReductionError, Result};
use serde::{Deserialize, Serialize};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReasoning {
    /// Processed and judged executable.
    SterlingExecutable,
    /// Processed and judged not executable.
    SterlingNotExecutable,
    /// The authority did not process the envelope.
    SterlingUnavailable,
    /// No reduction was attempted at all.
    NoReduction,
}

impl EligibilityReasoning {
    /// Name used in thought records and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityReasoning::SterlingExecutable => "sterling_executable",
            EligibilityReasoning::SterlingNotExecutable => "sterling_not_executable",
            EligibilityReasoning::SterlingUnavailable => "sterling_unavailable",
            EligibilityReasoning::NoReduction => "no_reduction",
        }
    }
}

/// The gate's output. `derived` is always true: a decision only ever
/// comes from [`eligibility`], never from hand-assembled fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    /// Whether the utterance may become a task.
    pub convert_eligible: bool,
    /// Marker that the decision came from the gate.
    pub derived: bool,
    /// Why.
    pub reasoning: EligibilityReasoning,
}

/// Compute the conversion decision for a reduction attempt.
///
/// `None` means no reduction was attempted.
pub fn eligibility(provenance: Option<&ReductionProvenance>) -> EligibilityDecision {
    match provenance {
        None => EligibilityDecision {
            convert_eligible: false,
            derived: true,
            reasoning: EligibilityReasoning::NoReduction,
        },
        Some(p) => {
            let convert_eligible = p.sterling_processed && p.is_executable;
            let reasoning = if !p.sterling_processed {
                EligibilityReasoning::SterlingUnavailable
            } else if p.is_executable {
                EligibilityReasoning::SterlingExecutable
            } else {
                EligibilityReasoning::SterlingNotExecutable
            };
            EligibilityDecision {
                convert_eligible,
                derived: true,
                reasoning,
            }
        }
    }
}

/// Re-check a decision against the provenance it was derived from.
pub fn assert_invariant(
    provenance: Option<&ReductionProvenance>,
    decision: &EligibilityDecision,
) -> Result<()> {
    if !decision.derived {
        return Err(ReductionError::InvariantViolation {
            detail: "decision was not derived by the gate".to_string(),
        });
    }
    let expected = match provenance {
        None => false,
        Some(p) => p.sterling_processed && p.is_executable,
    };
    if decision.convert_eligible != expected {
        let (processed, executable) = provenance
            .map(|p| (p.sterling_processed, p.is_executable))
            .unwrap_or((false, false));
        return Err(ReductionError::InvariantViolation {
            detail: format!(
                "convert_eligible={} but sterling_processed={} is_executable={}",
                decision.convert_eligible, processed, executable
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(processed: bool, executable: bool) -> ReductionProvenance {
        ReductionProvenance {
            sterling_processed: processed,
            envelope_id: "abcd1234abcd1234".to_string(),
            reducer_result: processed.then(|| serde_json::json!({})),
            is_executable: executable,
            block_reason: (processed && !executable).then(|| "blocked".to_string()),
            duration_ms: 7,
            sterling_error: (!processed).then(|| "unreachable".to_string()),
        }
    }

    #[test]
    fn all_four_quadrants_gate_correctly() {
        let cases = [
            (true, true, true, EligibilityReasoning::SterlingExecutable),
            (true, false, false, EligibilityReasoning::SterlingNotExecutable),
            (false, false, false, EligibilityReasoning::SterlingUnavailable),
            // Defensive quadrant: an executable verdict without processing
            // must still be denied.
            (false, true, false, EligibilityReasoning::SterlingUnavailable),
        ];
        for (processed, executable, expected, reasoning) in cases {
            let p = provenance(processed, executable);
            let d = eligibility(Some(&p));
            assert_eq!(d.convert_eligible, expected);
            assert_eq!(d.reasoning, reasoning);
            assert!(d.derived);
            assert_invariant(Some(&p), &d).unwrap();
        }
    }

    #[test]
    fn no_reduction_is_not_eligible() {
        let d = eligibility(None);
        assert!(!d.convert_eligible);
        assert_eq!(d.reasoning, EligibilityReasoning::NoReduction);
        assert_invariant(None, &d).unwrap();
    }

    #[test]
    fn tampered_decision_trips_the_invariant() {
        let p = provenance(false, false);
        let mut d = eligibility(Some(&p));
        d.convert_eligible = true;
        assert!(assert_invariant(Some(&p), &d).is_err());
    }

    #[test]
    fn underived_decision_trips_the_invariant() {
        let p = provenance(true, true);
        let d = EligibilityDecision {
            convert_eligible: true,
            derived: false,
            reasoning: EligibilityReasoning::SterlingExecutable,
        };
        assert!(assert_invariant(Some(&p), &d).is_err());
    }
}

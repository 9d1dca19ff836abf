//! Property suite for the fail-closed boundary.

use cortex_reduction::{assert_invariant, eligibility, sanitize, ReductionProvenance};
use proptest::prelude::*;

fn provenance(
    processed: bool,
    executable: bool,
    block_reason: Option<String>,
    sterling_error: Option<String>,
    duration_ms: u64,
) -> ReductionProvenance {
    ReductionProvenance {
        sterling_processed: processed,
        envelope_id: "abcd1234abcd1234".to_string(),
        reducer_result: processed.then(|| serde_json::json!({"opaque": true})),
        is_executable: executable,
        block_reason,
        duration_ms,
        sterling_error,
    }
}

proptest! {
    /// Fail-closed over the whole provenance space:
    /// `convert_eligible ⇔ processed ∧ executable`, and the runtime
    /// self-check accepts every decision the gate itself produced.
    #[test]
    fn eligibility_is_fail_closed(
        processed: bool,
        executable: bool,
        block_reason in proptest::option::of("[a-z_ ]{1,24}"),
        sterling_error in proptest::option::of("[a-z_]{1,16}"),
        duration_ms in 0u64..60_000,
    ) {
        let p = provenance(processed, executable, block_reason, sterling_error, duration_ms);
        let d = eligibility(Some(&p));
        prop_assert_eq!(d.convert_eligible, processed && executable);
        prop_assert!(d.derived);
        prop_assert!(assert_invariant(Some(&p), &d).is_ok());
    }

    /// A flipped eligibility bit never survives the self-check.
    #[test]
    fn tampered_decisions_are_always_caught(processed: bool, executable: bool) {
        let p = provenance(processed, executable, None, None, 0);
        let mut d = eligibility(Some(&p));
        d.convert_eligible = !d.convert_eligible;
        prop_assert!(assert_invariant(Some(&p), &d).is_err());
    }

    /// Sanitization is stable and idempotent for arbitrary input.
    #[test]
    fn sanitize_is_stable_and_idempotent(input in ".{0,300}") {
        let once = sanitize(&input);
        let again = sanitize(&input);
        prop_assert_eq!(&once, &again);

        let twice = sanitize(&once.sanitized_text);
        prop_assert_eq!(&once.sanitized_text, &twice.sanitized_text);
        prop_assert!(twice.flags.is_identity());
        prop_assert!(twice.markers.is_empty());
    }

    /// Marker spans travel verbatim; their content is never rewritten.
    #[test]
    fn markers_are_extracted_verbatim(
        prefix in "[a-z]{1,12}",
        content in "[a-z0-9_]{0,24}",
        suffix in "[a-z]{1,12}",
    ) {
        let marker = format!("[GOAL: {content}]");
        let out = sanitize(&format!("{prefix} {marker} {suffix}"));
        prop_assert_eq!(out.markers, vec![marker]);
        prop_assert_eq!(out.sanitized_text, format!("{prefix} {suffix}"));
    }
}

//! Reduction wire response and the provenance the core keeps.
//!
//! `reducer_result` is opaque JSON. The core carries it to the execution
//! collaborator untouched; only the two booleans and the block reason are
//! ever read on this side of the boundary.

use crate::envelope::ENVELOPE_SCHEMA_VERSION;
use crate::{ReductionError, Result};
use serde::{Deserialize, Serialize};

/// Timings reported by the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTimings {
    /// Time the authority spent reducing, ms.
    pub reduce_ms: u64,
}

/// The authority's response to one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionResponse {
    /// Envelope this response answers. Must match the request.
    pub envelope_id: String,
    /// Envelope schema version the authority spoke.
    pub schema_version: String,
    /// Opaque semantic payload.
    pub reducer_result: serde_json::Value,
    /// Whether the authority judged the utterance executable.
    pub is_executable: bool,
    /// Why not, when not.
    pub block_reason: Option<String>,
    /// Authority-side timings.
    #[serde(default)]
    pub timings: ResponseTimings,
}

impl ReductionResponse {
    /// Validate correlation and schema. A failure here is treated as
    /// authority unavailability plus a violation telemetry event.
    pub fn validate(&self, expected_envelope_id: &str) -> Result<()> {
        if self.envelope_id != expected_envelope_id {
            return Err(ReductionError::Malformed {
                detail: format!(
                    "response for envelope {} applied to request {}",
                    self.envelope_id, expected_envelope_id
                ),
            });
        }
        if self.schema_version != ENVELOPE_SCHEMA_VERSION {
            return Err(ReductionError::Malformed {
                detail: format!("unsupported response schema {}", self.schema_version),
            });
        }
        if !self.is_executable && self.block_reason.is_none() {
            return Err(ReductionError::Malformed {
                detail: "non-executable response without block reason".to_string(),
            });
        }
        Ok(())
    }
}

/// What the core records about one reduction attempt. Always well-formed,
/// whether or not the authority was reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionProvenance {
    /// Whether the authority actually processed the envelope.
    pub sterling_processed: bool,
    /// Envelope the attempt belongs to.
    pub envelope_id: String,
    /// Opaque semantic payload, present only when processed.
    pub reducer_result: Option<serde_json::Value>,
    /// The authority's executability verdict. Never true unless processed.
    pub is_executable: bool,
    /// The authority's block reason, when it gave one.
    pub block_reason: Option<String>,
    /// Round-trip duration observed by the client, ms.
    pub duration_ms: u64,
    /// Client-side failure string when the path failed.
    pub sterling_error: Option<String>,
}

impl ReductionProvenance {
    /// Provenance for a processed response.
    pub fn processed(response: &ReductionResponse, duration_ms: u64) -> Self {
        Self {
            sterling_processed: true,
            envelope_id: response.envelope_id.clone(),
            reducer_result: Some(response.reducer_result.clone()),
            is_executable: response.is_executable,
            block_reason: response.block_reason.clone(),
            duration_ms,
            sterling_error: None,
        }
    }

    /// Fail-closed provenance for an attempt the authority did not process.
    /// Nothing built from this can ever be executable.
    pub fn unprocessed(
        envelope_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            sterling_processed: false,
            envelope_id: envelope_id.into(),
            reducer_result: None,
            is_executable: false,
            block_reason: None,
            duration_ms,
            sterling_error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(envelope_id: &str) -> ReductionResponse {
        ReductionResponse {
            envelope_id: envelope_id.to_string(),
            schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
            reducer_result: json!({"opaque": true}),
            is_executable: true,
            block_reason: None,
            timings: ResponseTimings { reduce_ms: 4 },
        }
    }

    #[test]
    fn validate_accepts_matching_response() {
        assert!(response("abcd1234abcd1234").validate("abcd1234abcd1234").is_ok());
    }

    #[test]
    fn validate_rejects_stale_correlation() {
        let err = response("aaaaaaaaaaaaaaaa")
            .validate("bbbbbbbbbbbbbbbb")
            .unwrap_err();
        assert!(matches!(err, ReductionError::Malformed { .. }));
    }

    #[test]
    fn validate_rejects_unknown_schema() {
        let mut r = response("abcd1234abcd1234");
        r.schema_version = "99".to_string();
        assert!(r.validate("abcd1234abcd1234").is_err());
    }

    #[test]
    fn validate_requires_block_reason_when_blocked() {
        let mut r = response("abcd1234abcd1234");
        r.is_executable = false;
        r.block_reason = None;
        assert!(r.validate("abcd1234abcd1234").is_err());
        r.block_reason = Some("not a concrete action".to_string());
        assert!(r.validate("abcd1234abcd1234").is_ok());
    }

    #[test]
    fn unprocessed_is_never_executable() {
        let p = ReductionProvenance::unprocessed("abcd1234abcd1234", "timeout", 500);
        assert!(!p.sterling_processed);
        assert!(!p.is_executable);
        assert!(p.reducer_result.is_none());
        assert_eq!(p.sterling_error.as_deref(), Some("timeout"));
    }
}

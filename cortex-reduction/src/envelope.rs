//! The immutable input bundle for semantic reduction.

use crate::sanitize::{SanitizeFlags, SanitizeOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the request/response envelope schema.
pub const ENVELOPE_SCHEMA_VERSION: &str = "1";

/// Hex characters kept from the content digest for the envelope id.
const ENVELOPE_ID_LEN: usize = 16;

/// Input to the semantic authority. Immutable once built; the id is a
/// stable digest of the content, so identical content yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable 16-hex content digest.
    pub envelope_id: String,
    /// Envelope schema version.
    pub schema_version: String,
    /// Sanitized utterance text.
    pub sanitized_text: String,
    /// Which sanitizer transforms fired.
    pub sanitization_flags: SanitizeFlags,
    /// Sanitizer rule-set version the text was cleaned under.
    pub sanitizer_version: String,
    /// Marker spans, verbatim and uninterpreted.
    pub markers: Vec<String>,
    /// Digest of the situational context the utterance was produced in.
    pub context_digest: String,
}

impl Envelope {
    /// Build an envelope from a sanitize outcome and a context digest.
    pub fn build(outcome: &SanitizeOutcome, context_digest: impl Into<String>) -> Self {
        let context_digest = context_digest.into();
        let envelope_id = digest_id(
            &outcome.sanitized_text,
            &outcome.markers,
            outcome.version,
            &context_digest,
        );
        Self {
            envelope_id,
            schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
            sanitized_text: outcome.sanitized_text.clone(),
            sanitization_flags: outcome.flags,
            sanitizer_version: outcome.version.to_string(),
            markers: outcome.markers.clone(),
            context_digest,
        }
    }
}

/// First 16 hex characters of a SHA-256 over the identifying content.
/// Field boundaries use a unit separator so concatenation is unambiguous.
fn digest_id(text: &str, markers: &[String], sanitizer_version: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ENVELOPE_SCHEMA_VERSION.as_bytes());
    hasher.update([0x1f]);
    hasher.update(sanitizer_version.as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    for marker in markers {
        hasher.update([0x1f]);
        hasher.update(marker.as_bytes());
    }
    hasher.update([0x1f]);
    hasher.update(context.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..ENVELOPE_ID_LEN].to_string()
}

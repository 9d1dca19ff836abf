//! Optional on-disk latency profile.
//!
//! The core is stateless between runs except for this file: observed
//! per-module percentiles, written at shutdown and loaded at startup to
//! seed degradation decisions before fresh samples accumulate.
//!
//! Schema: `{ version, updatedAt, modules: { id: { p50, p95, p99,
//! samples } } }`, all latencies in milliseconds.

use crate::monitor::PerfMonitor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Current profile schema version.
pub const PROFILE_VERSION: u32 = 1;

/// Errors reading or writing the profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Filesystem error.
    #[error("latency profile io: {0}")]
    Io(#[from] std::io::Error),
    /// The file exists but does not parse.
    #[error("latency profile malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The file parses but carries an unknown schema version.
    #[error("latency profile version {found} unsupported (expected {PROFILE_VERSION})")]
    Version {
        /// Version found in the file.
        found: u32,
    },
}

/// Persisted percentiles for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// Median, ms.
    #[serde(rename = "p50")]
    pub p50_ms: u64,
    /// 95th percentile, ms.
    #[serde(rename = "p95")]
    pub p95_ms: u64,
    /// 99th percentile, ms.
    #[serde(rename = "p99")]
    pub p99_ms: u64,
    /// Samples behind the percentiles.
    pub samples: usize,
}

/// The persisted profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyProfile {
    /// Schema version.
    pub version: u32,
    /// When the profile was written.
    pub updated_at: DateTime<Utc>,
    /// Per-module entries, keyed by module id.
    pub modules: BTreeMap<String, ProfileEntry>,
}

impl LatencyProfile {
    /// Snapshot the monitor into a profile.
    pub fn capture(monitor: &PerfMonitor) -> Self {
        let modules = monitor
            .all_stats()
            .into_iter()
            .map(|(id, s)| {
                (
                    id.to_string(),
                    ProfileEntry {
                        p50_ms: s.p50_ms,
                        p95_ms: s.p95_ms,
                        p99_ms: s.p99_ms,
                        samples: s.samples,
                    },
                )
            })
            .collect();
        Self {
            version: PROFILE_VERSION,
            updated_at: Utc::now(),
            modules,
        }
    }

    /// Load from disk. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ProfileError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let profile: LatencyProfile = serde_json::from_str(&raw)?;
        if profile.version != PROFILE_VERSION {
            return Err(ProfileError::Version {
                found: profile.version,
            });
        }
        Ok(Some(profile))
    }

    /// Write to disk, pretty-printed.
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}

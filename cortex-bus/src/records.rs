//! Payload types for the task, thought, and safety topics.
//!
//! Tasks carry the reducer's result as an opaque JSON value. The execution
//! collaborator interprets it; the core never does.

use chrono::{DateTime, Utc};
use cortex_core::{ModuleId, Signal, ThreatLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An executable task, emitted only when the eligibility gate approved the
/// underlying reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub task_id: Uuid,
    /// Envelope that authorized this task.
    pub source_envelope_id: String,
    /// Opaque semantic payload from the reducer. Never destructured here.
    pub reducer_result: serde_json::Value,
    /// Module whose utterance became this task.
    pub source_module: ModuleId,
    /// Wall-clock emission time.
    pub at: DateTime<Utc>,
}

/// A thought that did not become a task. Consumed by memory collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtRecord {
    /// Utterance id.
    pub utterance_id: Uuid,
    /// Module that produced the thought.
    pub source_module: ModuleId,
    /// Envelope id when a reduction was attempted.
    pub envelope_id: Option<String>,
    /// Sanitized text of the thought.
    pub text: String,
    /// Why the thought is not executable (eligibility reasoning name).
    pub reason: String,
    /// Reducer-provided block reason, when present.
    pub block_reason: Option<String>,
    /// Wall-clock emission time.
    pub at: DateTime<Utc>,
}

/// Alert on the safety topic. Overflow of this topic is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAlert {
    /// Threat level after this alert.
    pub threat: ThreatLevel,
    /// The signal that raised the alert, when one did.
    pub signal: Option<Signal>,
    /// One-line description.
    pub summary: String,
    /// Wall-clock time.
    pub at: DateTime<Utc>,
}

impl SafetyAlert {
    /// Alert from a hazardous signal.
    pub fn from_signal(threat: ThreatLevel, signal: Signal) -> Self {
        let summary = format!("{} signal at intensity {:.2}", signal.kind, signal.intensity);
        Self {
            threat,
            signal: Some(signal),
            summary,
            at: Utc::now(),
        }
    }
}

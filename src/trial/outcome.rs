//! Response events and trial outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::Phase;

/// Kind of input device a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// Keyboard press
    Key,
    /// Pointer interaction (click, slider movement)
    Pointer,
    /// Form or button submission
    Submit,
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Key => "key",
            Self::Pointer => "pointer",
            Self::Submit => "submit",
        };
        f.write_str(s)
    }
}

/// One captured response.
///
/// `timestamp_ms` is measured from the start of the trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    /// Device the response came from
    pub source: InputSource,
    /// Response payload (key name, slider value, form fields)
    pub value: Value,
    /// Milliseconds since trial start
    pub timestamp_ms: u64,
}

/// What drove a trial into `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A qualifying response ended the trial
    Response,
    /// The trial deadline elapsed
    Timeout,
    /// The trial was ended from outside
    ExternalEnd,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Response => "response",
            Self::Timeout => "timeout",
            Self::ExternalEnd => "external_end",
        };
        f.write_str(s)
    }
}

/// Immutable result of one completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    /// Position of the trial in the timeline
    pub trial_index: usize,
    /// Trial label from the configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque metadata copied from the configuration
    #[serde(default)]
    pub metadata: Value,
    /// Every recorded response, in arrival order
    pub response_events: Vec<ResponseEvent>,
    /// The earliest recorded response
    pub first_response: Option<ResponseEvent>,
    /// The authoritative response value under the trial's policy
    pub primary_value: Option<Value>,
    /// Milliseconds from trial start to completion
    pub elapsed_ms: u64,
    /// What ended the trial
    pub terminated_by: Termination,
    /// Phase that was active when the trial completed
    pub completed_in: Phase,
    /// Key hold duration for hold-measuring trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_duration_ms: Option<u64>,
    /// Participant status to report once this trial completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_checkpoint: Option<String>,
}

impl TrialOutcome {
    /// Returns true if at least one response was recorded.
    #[must_use]
    pub fn responded(&self) -> bool {
        !self.response_events.is_empty()
    }
}

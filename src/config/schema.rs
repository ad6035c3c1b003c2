//! Configuration schema types
//!
//! This module defines the experiment and trial configuration types.
//! These types are deserialized from YAML configuration files and turned
//! into normalized [`TrialSpec`] values before any trial starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::trial::outcome::InputSource;
use crate::trial::recorder::ResponsePolicy;

/// Default number of attempts for a data submission.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default fixed wait between submission attempts, in milliseconds.
pub const DEFAULT_WAIT_MS: u64 = 2000;

/// Default per-request timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const fn default_true() -> bool {
    true
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration of one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExperimentConfig {
    /// Experiment metadata (required)
    pub experiment: ExperimentMetadata,

    /// Where and how results are saved
    #[serde(default)]
    pub submission: SubmissionSettings,

    /// Ordered trial list
    #[serde(default)]
    pub trials: Vec<TrialConfig>,
}

// ============================================================================
// Experiment Metadata
// ============================================================================

/// Experiment identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExperimentMetadata {
    /// Experiment name; also scopes the persisted local state
    pub name: String,

    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Contact address shown when data cannot be saved
    pub contact_email: String,

    /// Between-subject conditions to assign from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    /// Fixed part placed after the first random block of the completion code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_code_prefix: Option<String>,

    /// Fixed part placed at the end of the completion code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_code_suffix: Option<String>,
}

// ============================================================================
// Submission Settings
// ============================================================================

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubmissionSettings {
    /// Base URL of the result store (`/data` and `/participants` are appended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Attempts for the session data submission
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait between attempts
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    /// Attempts for status updates (defaults to `max_attempts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_max_attempts: Option<u32>,

    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            wait_ms: DEFAULT_WAIT_MS,
            status_max_attempts: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// Trial Configuration
// ============================================================================

/// Immutable description of one trial, as written in the configuration.
///
/// Call [`TrialConfig::normalize`] to check required fields and expand
/// shorthand before handing the trial to a controller. [`Default`] matches
/// a trial loaded from YAML with every optional field left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrialConfig {
    /// Label for logs and output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Length of the display phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_duration_ms: Option<u64>,

    /// Length of the gated response phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_duration_ms: Option<u64>,

    /// Overall deadline measured from trial start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_duration_ms: Option<u64>,

    /// Shorthand applied to any unset display or gate duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Accepted input set (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_inputs: Option<Vec<AcceptedInput>>,

    /// A qualifying response completes the trial
    #[serde(default = "default_true")]
    pub response_ends_trial: bool,

    /// Record every response and treat the latest as authoritative
    #[serde(default)]
    pub multi_response: bool,

    /// Log responses after the first one
    #[serde(default = "default_true")]
    pub keep_history: bool,

    /// Handling of input that arrives before the gate opens
    #[serde(default)]
    pub gate_input: GateInputPolicy,

    /// Pause after completion before the next trial starts
    #[serde(default)]
    pub post_trial_gap_ms: u64,

    /// Participant status reported once the trial completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_checkpoint: Option<String>,

    /// Opaque data copied into the outcome
    #[serde(default)]
    pub metadata: Value,
}

/// One accepted input source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AcceptedInput {
    /// Device kind
    pub source: InputSource,

    /// Accepted keys; empty accepts any key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    /// Report held and auto-repeated keys
    #[serde(default)]
    pub allow_held_key: bool,

    /// Time the press until its release
    #[serde(default)]
    pub measure_hold: bool,

    /// The response may complete the trial
    #[serde(default = "default_true")]
    pub finishes: bool,
}

impl AcceptedInput {
    /// Accepts the given keys.
    #[must_use]
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: InputSource::Key,
            keys: keys.into_iter().map(Into::into).collect(),
            allow_held_key: false,
            measure_hold: false,
            finishes: true,
        }
    }

    /// Accepts any event from `source`.
    #[must_use]
    pub const fn any(source: InputSource) -> Self {
        Self {
            source,
            keys: Vec::new(),
            allow_held_key: false,
            measure_hold: false,
            finishes: true,
        }
    }
}

/// What happens to responses that arrive before the gate opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateInputPolicy {
    /// Discard them
    #[default]
    Drop,
    /// Queue them and replay at gate open
    Release,
}

// ============================================================================
// Normalized Trial
// ============================================================================

/// A validated trial with defaults expanded.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    /// Label for logs and output
    pub name: Option<String>,
    /// Display phase length; `None` exits the phase immediately
    pub display: Option<Duration>,
    /// Gate phase length; `None` exits the phase immediately
    pub gate: Option<Duration>,
    /// Overall deadline; `None` is unbounded
    pub deadline: Option<Duration>,
    /// Accepted input set
    pub inputs: Vec<AcceptedInput>,
    /// A qualifying response completes the trial
    pub response_ends_trial: bool,
    /// Recording policy
    pub policy: ResponsePolicy,
    /// Pre-gate input handling
    pub gate_input: GateInputPolicy,
    /// Pause after completion
    pub post_trial_gap: Duration,
    /// Status reported on completion
    pub status_checkpoint: Option<String>,
    /// Opaque metadata
    pub metadata: Value,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            name: None,
            display_duration_ms: None,
            gate_duration_ms: None,
            trial_duration_ms: None,
            delay_ms: None,
            accepted_inputs: None,
            response_ends_trial: default_true(),
            multi_response: false,
            keep_history: default_true(),
            gate_input: GateInputPolicy::default(),
            post_trial_gap_ms: 0,
            status_checkpoint: None,
            metadata: Value::Null,
        }
    }
}

fn positive_ms(value: Option<u64>) -> Option<Duration> {
    value.filter(|&ms| ms > 0).map(Duration::from_millis)
}

impl TrialConfig {
    /// Creates a trial accepting `inputs`, with every other field defaulted.
    #[must_use]
    pub fn with_inputs(inputs: Vec<AcceptedInput>) -> Self {
        Self {
            accepted_inputs: Some(inputs),
            ..Self::default()
        }
    }

    /// Checks required fields and expands defaults.
    ///
    /// `location` names the trial in error messages (e.g. `trials[2]`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] when `accepted_inputs` is
    /// absent and [`ConfigError::InvalidValue`] when an input uses
    /// key-only options on another source, or when nothing but an
    /// external end could ever complete the trial.
    pub fn normalize(&self, location: &str) -> Result<TrialSpec, ConfigError> {
        let inputs = self
            .accepted_inputs
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "accepted_inputs".to_string(),
                location: location.to_string(),
            })?;

        for (i, input) in inputs.iter().enumerate() {
            if input.source != InputSource::Key
                && (!input.keys.is_empty() || input.allow_held_key || input.measure_hold)
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("{location}.accepted_inputs[{i}]"),
                    value: input.source.to_string(),
                    expected: "source 'key' when keys, allow_held_key or measure_hold is set"
                        .to_string(),
                });
            }
        }

        let deadline = positive_ms(self.trial_duration_ms);
        let can_finish = self.response_ends_trial && inputs.iter().any(|i| i.finishes);
        if !can_finish && deadline.is_none() {
            return Err(ConfigError::InvalidValue {
                field: format!("{location}.trial_duration_ms"),
                value: "none".to_string(),
                expected: "a deadline when no accepted input can end the trial".to_string(),
            });
        }

        let policy = if self.multi_response {
            ResponsePolicy::AllWins
        } else {
            ResponsePolicy::FirstWins {
                keep_history: self.keep_history,
            }
        };

        Ok(TrialSpec {
            name: self.name.clone(),
            display: positive_ms(self.display_duration_ms.or(self.delay_ms)),
            gate: positive_ms(self.gate_duration_ms.or(self.delay_ms)),
            deadline,
            inputs,
            response_ends_trial: self.response_ends_trial,
            policy,
            gate_input: self.gate_input,
            post_trial_gap: Duration::from_millis(self.post_trial_gap_ms),
            status_checkpoint: self.status_checkpoint.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

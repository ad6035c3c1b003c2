//! Configuration validation
//!
//! Semantic checks on a deserialized [`ExperimentConfig`]. Validation
//! collects every issue instead of stopping at the first one, so a single
//! `trialkit validate` run reports everything that needs fixing.

use std::collections::HashSet;

use crate::config::schema::{ExperimentConfig, SubmissionSettings, TrialConfig};
use crate::error::{ConfigError, Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Experiment configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &ExperimentConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_experiment(config);
        self.validate_submission(&config.submission);
        self.validate_trials(&config.trials);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Experiment
    // ========================================================================

    fn validate_experiment(&mut self, config: &ExperimentConfig) {
        let meta = &config.experiment;
        if meta.name.trim().is_empty() {
            self.add_error("experiment.name", "experiment name is required and cannot be empty");
        }
        if meta.contact_email.trim().is_empty() {
            self.add_error(
                "experiment.contact_email",
                "a contact address is required; it is shown when data cannot be saved",
            );
        } else if !meta.contact_email.contains('@') {
            self.add_warning("experiment.contact_email", "contact address does not look like an email");
        }

        let mut seen = HashSet::new();
        for (i, condition) in meta.conditions.iter().enumerate() {
            if !seen.insert(condition.as_str()) {
                self.add_warning(
                    &format!("experiment.conditions[{i}]"),
                    &format!("duplicate condition '{condition}' skews assignment"),
                );
            }
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    fn validate_submission(&mut self, settings: &SubmissionSettings) {
        match settings.endpoint.as_deref() {
            None => self.add_warning(
                "submission.endpoint",
                "no endpoint configured; sessions can only run with --dry-run or --endpoint",
            ),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                self.add_error(
                    "submission.endpoint",
                    &format!("endpoint '{url}' must be an http:// or https:// URL"),
                );
            }
            Some(_) => {}
        }

        if settings.max_attempts == 0 {
            self.add_error("submission.max_attempts", "at least one attempt is required");
        }
        if settings.status_max_attempts == Some(0) {
            self.add_error("submission.status_max_attempts", "at least one attempt is required");
        }
        if settings.timeout_ms == 0 {
            self.add_error("submission.timeout_ms", "request timeout must be positive");
        }
        if settings.wait_ms == 0 && settings.max_attempts > 1 {
            self.add_warning("submission.wait_ms", "retries run back to back without a wait");
        }
    }

    // ========================================================================
    // Trials
    // ========================================================================

    fn validate_trials(&mut self, trials: &[TrialConfig]) {
        if trials.is_empty() {
            self.add_warning("trials", "timeline has no trials");
        }

        let mut names = HashSet::new();
        for (i, trial) in trials.iter().enumerate() {
            let location = format!("trials[{i}]");

            if let Some(name) = &trial.name {
                if !names.insert(name.as_str()) {
                    self.add_warning(&format!("{location}.name"), &format!("duplicate trial name '{name}'"));
                }
            }

            let spec = match trial.normalize(&location) {
                Ok(spec) => spec,
                Err(err) => {
                    let path = match &err {
                        ConfigError::MissingRequired { field, location } => {
                            format!("{location}.{field}")
                        }
                        ConfigError::InvalidValue { field, .. } => field.clone(),
                        _ => location.clone(),
                    };
                    self.add_error(&path, &err.to_string());
                    continue;
                }
            };

            if let Some(deadline) = spec.deadline {
                let opens_at = spec.display.unwrap_or_default() + spec.gate.unwrap_or_default();
                if deadline <= opens_at && !spec.inputs.is_empty() {
                    self.add_warning(
                        &format!("{location}.trial_duration_ms"),
                        "deadline elapses before responses are accepted; the trial always times out",
                    );
                }
            }

            if spec.inputs.iter().any(|i| i.measure_hold) && !spec.response_ends_trial {
                self.add_warning(
                    &format!("{location}.accepted_inputs"),
                    "hold durations are measured but the release does not end the trial",
                );
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AcceptedInput, ExperimentMetadata};
    use crate::trial::outcome::InputSource;

    fn base() -> ExperimentConfig {
        ExperimentConfig {
            experiment: ExperimentMetadata {
                name: "stroop".to_string(),
                title: None,
                contact_email: "lab@example.org".to_string(),
                conditions: vec![],
                completion_code_prefix: None,
                completion_code_suffix: None,
            },
            submission: SubmissionSettings {
                endpoint: Some("https://results.example.org".to_string()),
                ..SubmissionSettings::default()
            },
            trials: vec![TrialConfig::with_inputs(vec![AcceptedInput::keys(["f", "j"])])],
        }
    }

    #[test]
    fn test_valid_config_has_no_issues() {
        let result = Validator::new().validate(&base());
        assert!(result.is_valid());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = base();
        config.experiment.name = String::new();
        config.submission.max_attempts = 0;
        config.trials.push(TrialConfig::default());

        let result = Validator::new().validate(&config);
        assert!(result.has_errors());
        let paths: Vec<_> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"experiment.name"));
        assert!(paths.contains(&"submission.max_attempts"));
        assert!(paths.contains(&"trials[1].accepted_inputs"));
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        let mut config = base();
        config.submission.endpoint = Some("ftp://example.org".to_string());
        let result = Validator::new().validate(&config);
        assert_eq!(result.errors[0].path, "submission.endpoint");
    }

    #[test]
    fn test_deadline_before_gate_warns() {
        let mut config = base();
        config.trials[0].display_duration_ms = Some(500);
        config.trials[0].gate_duration_ms = Some(500);
        config.trials[0].trial_duration_ms = Some(800);

        let result = Validator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].path, "trials[0].trial_duration_ms");
    }

    #[test]
    fn test_duplicate_trial_names_warn() {
        let mut config = base();
        let mut trial = TrialConfig::with_inputs(vec![AcceptedInput::any(InputSource::Submit)]);
        trial.name = Some("practice".to_string());
        config.trials = vec![trial.clone(), trial];

        let result = Validator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].path, "trials[1].name");
    }

    #[test]
    fn test_missing_endpoint_is_warning() {
        let mut config = base();
        config.submission.endpoint = None;
        let result = Validator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].path, "submission.endpoint");
    }
}

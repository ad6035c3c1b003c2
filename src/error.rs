//! Error types for `trialkit`
//!
//! This module provides the error hierarchy used across trial
//! construction, configuration loading, local state persistence and
//! result submission, together with the process exit codes.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `trialkit` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Session data could not be saved
    pub const SUBMISSION_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `trialkit` operations.
///
/// Aggregates all domain-specific errors and maps each of them to an
/// exit code.
#[derive(Debug, Error)]
pub enum TrialKitError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Result submission error
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// Local state persistence error
    #[error(transparent)]
    State(#[from] StateError),

    /// Participant input error
    #[error(transparent)]
    Input(#[from] InputError),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrialKitError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Submission(_) => ExitCode::SUBMISSION_ERROR,
            Self::State(_) | Self::Io(_) => ExitCode::IO_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Input(_) => ExitCode::ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading, validation and trial construction errors.
///
/// A trial whose configuration is rejected never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Configuration file exceeds the size limit
    #[error("configuration file {path} is {size} bytes (limit: {limit})")]
    TooLarge {
        /// Path to the configuration file
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },

    /// Required field is missing from configuration
    #[error("missing required field '{field}' at {location}")]
    MissingRequired {
        /// Name of the missing field
        field: String,
        /// Location in the configuration (e.g., "trials[0]")
        location: String,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message supplied with the `${VAR:?message}` reference
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "trials[2].accepted_inputs")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Submission Errors
// ============================================================================

/// Errors raised while persisting results to the remote store.
///
/// Every variant except [`SubmissionError::Exhausted`] describes a single
/// failed attempt and is retried by the pipeline.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Connection failure or other transport-level error
    #[error("network error: {0}")]
    Network(String),

    /// Remote endpoint answered with a non-2xx status
    #[error("endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// Request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Endpoint URL could not be used
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Payload could not be encoded as JSON
    #[error("payload could not be encoded: {0}")]
    Encode(String),

    /// Retry budget spent; fatal and shown to the participant
    #[error(
        "error saving data after {attempts} attempts; please contact your experimenter at {contact}"
    )]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Human contact point shown to the participant
        contact: String,
    },
}

// ============================================================================
// Local State Errors
// ============================================================================

/// Errors reading or writing the persisted local state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// I/O error on the state file
    #[error("state file I/O error on {path}: {source}")]
    Io {
        /// Path to the state file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// State file contents are not valid JSON
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        /// Path to the state file
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },
}

// ============================================================================
// Input Errors
// ============================================================================

/// Errors reading participant input from the NDJSON feed.
#[derive(Debug, Error)]
pub enum InputError {
    /// A line could not be parsed as an input event
    #[error("malformed input line: {0}")]
    Malformed(String),

    /// A line exceeds the size limit
    #[error("input line too large: {size} bytes (limit: {limit})")]
    TooLarge {
        /// Actual line size in bytes
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },

    /// I/O error on the input stream
    #[error("input I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `trialkit` operations.
pub type Result<T> = std::result::Result<T, TrialKitError>;

// ============================================================================
// Tests
// ============================================================================

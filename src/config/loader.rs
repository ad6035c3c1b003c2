//! Configuration loader
//!
//! Loading pipeline for experiment files:
//! 1. Size check
//! 2. Environment variable expansion (on raw text, before parsing)
//! 3. YAML parsing into [`ExperimentConfig`]
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::ExperimentConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Maximum configuration file size in bytes.
    pub max_config_size: u64,

    /// Maximum number of trials in one timeline.
    pub max_trials: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_config_size: env_or("TRIALKIT_MAX_CONFIG_SIZE", 1024 * 1024),
            max_trials: env_or("TRIALKIT_MAX_TRIALS", 10_000),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<ExperimentConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({location})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Experiment configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads, validates and freezes the experiment file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, if an
    /// environment reference marked required is unset, if YAML parsing
    /// fails, or if validation reports errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        if metadata.len() > self.options.max_config_size {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: self.options.max_config_size,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Runs the pipeline on already-read file content.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigLoader::load`], minus the file checks.
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let (expanded, mut warnings) = expand_env(raw, path)?;

        if expanded.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: None,
                message: "configuration file is empty".to_string(),
            });
        }

        let config: ExperimentConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        if config.trials.len() > self.options.max_trials {
            return Err(ConfigError::InvalidValue {
                field: "trials".to_string(),
                value: format!("{} trials", config.trials.len()),
                expected: format!("at most {}", self.options.max_trials),
            });
        }

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }

        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Expands environment references in raw YAML text.
///
/// Runs before parsing so that expanded values keep YAML type inference.
///
/// - `${VAR}` expands to the value, or to nothing with a warning if unset
/// - `${VAR:-default}` expands to `default` if unset
/// - `${VAR:?message}` fails if unset
/// - `$$` is a literal `$`
fn expand_env(raw: &str, path: &Path) -> Result<(String, Vec<LoadWarning>), ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut warnings = Vec::new();
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let Some(body_start) = tail.strip_prefix('{') else {
            out.push('$');
            rest = tail;
            continue;
        };
        let Some(end) = closing_brace(body_start) else {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: Some(raw[..raw.len() - rest.len() + pos].matches('\n').count() + 1),
                message: "unclosed environment variable reference".to_string(),
            });
        };

        let reference = EnvReference::parse(&body_start[..end]);
        match std::env::var(reference.name) {
            Ok(value) => out.push_str(&value),
            Err(_) => match reference.fallback {
                Fallback::Default(default) => out.push_str(default),
                Fallback::Required(message) => {
                    return Err(ConfigError::EnvVarNotSet {
                        var: reference.name.to_string(),
                        location: message.to_string(),
                    });
                }
                Fallback::Empty => warnings.push(LoadWarning {
                    message: format!(
                        "environment variable '{}' is not set, using empty string",
                        reference.name
                    ),
                    location: Some(path.display().to_string()),
                }),
            },
        }
        rest = &body_start[end + 1..];
    }
    out.push_str(rest);

    Ok((out, warnings))
}

/// Byte offset of the `}` closing a reference body, honoring nested braces.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

enum Fallback<'a> {
    Empty,
    Default(&'a str),
    Required(&'a str),
}

struct EnvReference<'a> {
    name: &'a str,
    fallback: Fallback<'a>,
}

impl<'a> EnvReference<'a> {
    fn parse(body: &'a str) -> Self {
        if let Some((name, default)) = body.split_once(":-") {
            return Self {
                name,
                fallback: Fallback::Default(default),
            };
        }
        if let Some((name, message)) = body.split_once(":?") {
            return Self {
                name,
                fallback: Fallback::Required(message),
            };
        }
        Self {
            name: body,
            fallback: Fallback::Empty,
        }
    }
}

/// Parses an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default location of the experiment file when none is given.
#[must_use]
pub fn default_config_path() -> PathBuf {
    PathBuf::from("experiment.yaml")
}

// ============================================================================
// Tests
// ============================================================================

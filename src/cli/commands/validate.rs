//! `validate` command
//!
//! Loads each experiment file through the normal loader and reports every
//! issue found, without running anything.

use std::path::Path;

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::ConfigLoader;
use crate::error::{ConfigError, Severity, TrialKitError, ValidationIssue};

/// Outcome of validating one file.
#[derive(Debug)]
struct FileReport {
    file: String,
    trials: usize,
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl FileReport {
    fn valid(&self, strict: bool) -> bool {
        self.errors.is_empty() && !(strict && !self.warnings.is_empty())
    }
}

/// Validate experiment files without running them.
///
/// # Errors
///
/// Returns an I/O error if a file does not exist, and a validation error
/// listing every issue if any file is invalid (in strict mode warnings
/// count as errors).
pub fn run(args: &ValidateArgs) -> Result<(), TrialKitError> {
    let loader = ConfigLoader::with_defaults();
    let mut reports = Vec::with_capacity(args.files.len());

    for path in &args.files {
        if !path.exists() {
            return Err(TrialKitError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }
        tracing::info!(file = %path.display(), "validating experiment");
        reports.push(check(&loader, path));
    }

    match args.format {
        OutputFormat::Human => print_human(&reports, args.strict),
        OutputFormat::Json => print_json(&reports, args.strict),
    }

    let failed: Vec<&FileReport> = reports.iter().filter(|r| !r.valid(args.strict)).collect();
    if failed.is_empty() {
        return Ok(());
    }
    let files: Vec<&str> = failed.iter().map(|r| r.file.as_str()).collect();
    let mut errors = Vec::new();
    for report in failed {
        errors.extend(report.errors.iter().cloned());
        if args.strict {
            errors.extend(report.warnings.iter().cloned().map(|mut w| {
                w.severity = Severity::Error;
                w
            }));
        }
    }
    Err(ConfigError::ValidationError {
        path: files.join(", "),
        errors,
    }
    .into())
}

fn check(loader: &ConfigLoader, path: &Path) -> FileReport {
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(loaded) => FileReport {
            file,
            trials: loaded.config.trials.len(),
            errors: Vec::new(),
            warnings: loaded
                .warnings
                .into_iter()
                .map(|w| ValidationIssue {
                    path: w.location.unwrap_or_default(),
                    message: w.message,
                    severity: Severity::Warning,
                })
                .collect(),
        },
        Err(ConfigError::ValidationError { errors, .. }) => FileReport {
            file,
            trials: 0,
            errors,
            warnings: Vec::new(),
        },
        Err(other) => FileReport {
            file,
            trials: 0,
            errors: vec![ValidationIssue {
                path: String::new(),
                message: other.to_string(),
                severity: Severity::Error,
            }],
            warnings: Vec::new(),
        },
    }
}

fn print_human(reports: &[FileReport], strict: bool) {
    for report in reports {
        if report.valid(strict) {
            println!("ok      {} ({} trials)", report.file, report.trials);
        } else {
            println!("invalid {}", report.file);
        }
        for issue in report.errors.iter().chain(&report.warnings) {
            println!("  {issue}");
        }
    }
}

fn print_json(reports: &[FileReport], strict: bool) {
    let render = |issues: &[ValidationIssue]| {
        issues
            .iter()
            .map(|i| json!({ "path": i.path, "message": i.message }))
            .collect::<Vec<_>>()
    };
    let out: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "file": r.file,
                "valid": r.valid(strict),
                "trials": r.trials,
                "errors": render(&r.errors),
                "warnings": render(&r.warnings),
            })
        })
        .collect();
    println!("{}", serde_json::Value::Array(out));
}

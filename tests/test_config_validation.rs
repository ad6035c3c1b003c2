mod common;

use std::path::Path;

use common::run_cli;

fn validate(path: &Path, envs: &[(&str, &str)]) -> std::process::Output {
    run_cli(&["validate", path.to_str().unwrap()], "", envs)
}

fn write_temp(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

const HEADER: &str = "experiment:\n  name: stroop\n  contact_email: lab@example.org\nsubmission:\n  endpoint: http://127.0.0.1:9\n";

/// Empty YAML file should be rejected with a clear error.
#[test]
fn empty_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(&dir, "empty.yaml", b"\n");
    let output = validate(&path, &[]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("empty"), "report should mention 'empty': {stdout}");
}

/// Binary content is not a valid experiment file.
#[test]
fn binary_content_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(&dir, "binary.yaml", b"\x00\x01\x02\x03\xff\xfe\xfd\xfc");
    let output = validate(&path, &[]);
    assert!(!output.status.success(), "binary content should fail validation");
}

/// YAML syntax errors are reported as parse errors.
#[test]
fn yaml_syntax_error_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(&dir, "bad.yaml", b"experiment: [unclosed\n");
    let output = validate(&path, &[]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("parse error"), "report should describe the parse failure: {stdout}");
}

/// Duplicate trial names produce a warning but pass validation.
#[test]
fn duplicate_trial_names_warning() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "{HEADER}trials:\n  - name: same\n    trial_duration_ms: 100\n    accepted_inputs: [{{source: key}}]\n  - name: same\n    trial_duration_ms: 100\n    accepted_inputs: [{{source: key}}]\n"
    );
    let path = write_temp(&dir, "dupes.yaml", body.as_bytes());
    let output = validate(&path, &[]);
    assert!(
        output.status.success(),
        "duplicate names are a warning only: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("duplicate trial name 'same'"), "should warn: {stdout}");
}

/// A trial that can never finish by itself is rejected.
#[test]
fn unfinishable_trial_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "{HEADER}trials:\n  - name: stuck\n    response_ends_trial: false\n    accepted_inputs: [{{source: key}}]\n"
    );
    let path = write_temp(&dir, "stuck.yaml", body.as_bytes());
    let output = validate(&path, &[]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("trial_duration_ms"), "should name the missing deadline: {stdout}");
}

/// Required environment references fail when unset and expand when set.
#[test]
fn required_env_reference() {
    let dir = tempfile::tempdir().unwrap();
    let body = "experiment:\n  name: stroop\n  contact_email: ${TRIALKIT_TEST_CONTACT:?contact address required}\nsubmission:\n  endpoint: http://127.0.0.1:9\ntrials:\n  - trial_duration_ms: 100\n    accepted_inputs: [{source: key}]\n";
    let path = write_temp(&dir, "env.yaml", body.as_bytes());

    let unset = validate(&path, &[]);
    assert_eq!(unset.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&unset.stdout).contains("TRIALKIT_TEST_CONTACT"));

    let set = validate(&path, &[("TRIALKIT_TEST_CONTACT", "lab@example.org")]);
    assert!(
        set.status.success(),
        "expanded file should validate: {}",
        String::from_utf8_lossy(&set.stdout)
    );
}

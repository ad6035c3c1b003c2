//! Metrics collection for `trialkit`.
//!
//! Prometheus-compatible counters and histograms for trial timing and
//! submission health. Recording is a no-op until [`init_metrics`]
//! installs a recorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TrialKitError;
use crate::trial::outcome::{InputSource, Termination};
use crate::trial::state::Phase;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `TrialKitError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TrialKitError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TrialKitError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("trialkit_trials_total", "Trials completed, by termination");
    describe_histogram!(
        "trialkit_trial_duration_ms",
        "Trial duration from start to completion in milliseconds"
    );
    describe_counter!(
        "trialkit_phase_transitions_total",
        "Phase transitions, by entered phase"
    );
    describe_counter!("trialkit_responses_total", "Responses recorded, by source");
    describe_counter!(
        "trialkit_submission_attempts_total",
        "Submission attempts, by kind and result"
    );
    describe_counter!(
        "trialkit_submissions_exhausted_total",
        "Submission jobs that spent their attempt budget"
    );
}

/// Records a completed trial.
pub fn record_trial(terminated_by: Termination, elapsed: Duration) {
    counter!("trialkit_trials_total", "terminated_by" => terminated_by.to_string()).increment(1);
    histogram!("trialkit_trial_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Records a phase transition.
pub fn record_phase_transition(to: Phase) {
    counter!("trialkit_phase_transitions_total", "phase" => to.to_string()).increment(1);
}

/// Records a captured response.
pub fn record_response(source: InputSource) {
    counter!("trialkit_responses_total", "source" => source.to_string()).increment(1);
}

/// Records one submission attempt.
pub fn record_submission_attempt(kind: &'static str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("trialkit_submission_attempts_total", "kind" => kind, "result" => result)
        .increment(1);
}

/// Records an exhausted submission job.
pub fn record_submission_exhausted(kind: &'static str) {
    counter!("trialkit_submissions_exhausted_total", "kind" => kind).increment(1);
}

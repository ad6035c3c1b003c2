//! `run` command
//!
//! Loads the experiment, prepares local state and the participant
//! identity, runs the timeline against NDJSON input on stdin and saves
//! the finished session.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::RunArgs;
use crate::config::loader::ConfigLoader;
use crate::error::TrialKitError;
use crate::input::stdio::{MAX_LINE, pump};
use crate::observability::events::EventEmitter;
use crate::observability::metrics::init_metrics;
use crate::submission::pipeline::{RetryPolicy, SubmissionPipeline};
use crate::submission::store::LocalState;
use crate::submission::transport::HttpTransport;
use crate::timeline::orchestrator::{StatusCheckpoints, Timeline};
use crate::timeline::session::{ParticipantIdentity, SessionRecord, generate_completion_code};

/// Run an experiment session.
///
/// # Errors
///
/// Returns a config error for an invalid experiment, a usage error when
/// no identity or endpoint is available, a state error if the local state
/// file cannot be used, and the fatal submission error when the session
/// could not be saved.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), TrialKitError> {
    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    info!(config = %args.config.display(), "loading experiment");
    let loaded = ConfigLoader::with_defaults().load(&args.config)?;
    for warning in &loaded.warnings {
        warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    let config = loaded.config;
    let meta = &config.experiment;
    let timeline = Timeline::new(&config.trials)?;

    let state = Arc::new(match &args.state_file {
        Some(path) => LocalState::open(path)?,
        None => LocalState::in_memory(),
    });
    state.begin_experiment(&meta.name)?;
    let refresh_count = state.count_page_refresh()?;
    if refresh_count > 0 {
        warn!(refresh_count, "session restarted");
    }

    let data_key = format!("data:{}", meta.name);
    if !args.dry_run && state.is_settled(&data_key) {
        warn!(experiment = %meta.name, "session data already saved, not running again");
        return Ok(());
    }

    let condition = match &args.condition {
        Some(forced) => Some(forced.clone()),
        None => state.assign_condition(&meta.conditions, &mut rand::rng())?,
    };
    let identity = resolve_identity(args)?;
    info!(worker = %identity.worker_id, condition = condition.as_deref().unwrap_or("-"), "participant ready");

    let emitter = Arc::new(match &args.events {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });

    let pipeline = if args.dry_run {
        None
    } else {
        let endpoint = args
            .endpoint
            .as_deref()
            .or(config.submission.endpoint.as_deref())
            .ok_or_else(|| {
                TrialKitError::Usage(
                    "no submission endpoint: set submission.endpoint, pass --endpoint, or use --dry-run"
                        .to_string(),
                )
            })?;
        let transport = HttpTransport::new(endpoint, Duration::from_millis(config.submission.timeout_ms))?;
        info!(endpoint = transport.endpoint(), "submitting to result store");
        Some(Arc::new(
            SubmissionPipeline::new(Arc::new(transport), Arc::clone(&state), meta.contact_email.clone())
                .with_emitter(Arc::clone(&emitter)),
        ))
    };

    let mut timeline = timeline.with_emitter(Arc::clone(&emitter));
    if let Some(pipeline) = &pipeline {
        timeline.on_each_completion(StatusCheckpoints::new(
            Arc::clone(pipeline),
            identity.worker_id.clone(),
            RetryPolicy::for_status(&config.submission),
        ));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let input_cancel = cancel.child_token();
    let feed = tokio::spawn(pump(
        BufReader::new(tokio::io::stdin()),
        tx,
        MAX_LINE,
        input_cancel.clone(),
    ));

    let mut session = SessionRecord::new(meta.name.clone(), identity);
    session.condition = condition;
    session.refresh_count = refresh_count;
    let session = timeline.run(session, &mut rx).await;

    input_cancel.cancel();
    match feed.await {
        Ok(Err(e)) => warn!(error = %e, "input feed failed"),
        Err(e) => warn!(error = %e, "input feed task panicked"),
        Ok(Ok(())) => {}
    }

    let Some(pipeline) = pipeline else {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    };

    let result = pipeline
        .submit_session(&session, RetryPolicy::for_data(&config.submission))
        .await;
    pipeline.settle_outstanding().await;
    let outcome = result?;
    info!(?outcome, "session saved");

    let code = generate_completion_code(
        meta.completion_code_prefix.as_deref().unwrap_or_default(),
        meta.completion_code_suffix.as_deref().unwrap_or_default(),
        &mut rand::rng(),
    );
    println!("{code}");
    Ok(())
}

/// Identity from explicit flags, then `--query`; a dry run falls back to a
/// generated debug identity.
fn resolve_identity(args: &RunArgs) -> Result<ParticipantIdentity, TrialKitError> {
    if let Some(worker_id) = &args.worker_id {
        return Ok(ParticipantIdentity {
            worker_id: worker_id.clone(),
            hit_id: args.hit_id.clone(),
            assignment_id: args.assignment_id.clone(),
            platform: args.platform,
        });
    }
    if let Some(query) = &args.query {
        return ParticipantIdentity::from_query(query).ok_or_else(|| {
            TrialKitError::Usage(format!("no participant identifier in query '{query}'"))
        });
    }
    if args.dry_run {
        return Ok(ParticipantIdentity::debug());
    }
    Err(TrialKitError::Usage(
        "participant identity required: pass --worker-id or --query, or use --dry-run".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use crate::timeline::session::Platform;
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["trialkit", "run"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_identity_from_flags() {
        let id = resolve_identity(&run_args(&["--worker-id", "W1", "--platform", "prolific"])).unwrap();
        assert_eq!(id.worker_id, "W1");
        assert_eq!(id.platform, Some(Platform::Prolific));
    }

    #[test]
    fn test_identity_from_query() {
        let id = resolve_identity(&run_args(&["--query", "?PROLIFIC_PID=P7&STUDY_ID=S"])).unwrap();
        assert_eq!(id.worker_id, "P7");
        assert_eq!(id.hit_id.as_deref(), Some("S"));
    }

    #[test]
    fn test_identity_required_outside_dry_run() {
        let err = resolve_identity(&run_args(&[])).unwrap_err();
        assert!(matches!(err, TrialKitError::Usage(_)));
        assert!(resolve_identity(&run_args(&["--dry-run"])).is_ok());
    }

    #[test]
    fn test_query_without_identifier_is_usage_error() {
        let err = resolve_identity(&run_args(&["--query", "foo=bar", "--dry-run"])).unwrap_err();
        assert!(matches!(err, TrialKitError::Usage(_)));
    }
}

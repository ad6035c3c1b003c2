mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use common::{MockStore, ScriptedTransport};
use trialkit::error::SubmissionError;
use trialkit::submission::{
    HttpTransport, LocalState, RetryPolicy, StatusUpdate, SubmissionOutcome, SubmissionPipeline,
    SubmissionRequest,
};
use trialkit::timeline::{ParticipantIdentity, Platform, SessionRecord};

fn status(worker: &str, status: &str) -> SubmissionRequest {
    SubmissionRequest::Status(StatusUpdate {
        worker_id: worker.to_string(),
        status: status.to_string(),
    })
}

fn pipeline(transport: Arc<ScriptedTransport>) -> Arc<SubmissionPipeline> {
    Arc::new(SubmissionPipeline::new(
        transport,
        Arc::new(LocalState::in_memory()),
        "lab@example.org",
    ))
}

// ============================================================================
// Retry bound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn exhausts_after_max_attempts() {
    let transport = Arc::new(ScriptedTransport::failing(100));
    let pipeline = pipeline(Arc::clone(&transport));
    let start = Instant::now();

    let outcome = pipeline
        .submit(status("W1", "started"), "status:W1:started", RetryPolicy::new(4, Duration::from_millis(500)))
        .await;

    assert!(matches!(outcome, SubmissionOutcome::Exhausted { attempts: 4, .. }));
    assert_eq!(transport.calls(), 4);
    // Waits only between attempts
    let waited = Instant::now() - start;
    assert!(waited >= Duration::from_millis(1500) && waited < Duration::from_millis(2000));
    assert!(!pipeline.store().is_settled("status:W1:started"));
    assert_eq!(pipeline.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn recovers_before_budget_runs_out() {
    let transport = Arc::new(ScriptedTransport::failing(2));
    let pipeline = pipeline(Arc::clone(&transport));

    let outcome = pipeline
        .submit(status("W1", "done"), "status:W1:done", RetryPolicy::new(5, Duration::from_millis(100)))
        .await;

    assert_eq!(outcome, SubmissionOutcome::Delivered { attempts: 3 });
    assert!(pipeline.store().is_settled("status:W1:done"));
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_job() {
    let transport = Arc::new(ScriptedTransport::failing(1));
    let pipeline = pipeline(Arc::clone(&transport));
    let policy = RetryPolicy::new(3, Duration::from_millis(100));

    let (a, b) = tokio::join!(
        pipeline.submit(status("W1", "x"), "status:W1:x", policy),
        pipeline.submit(status("W1", "x"), "status:W1:x", policy),
    );

    assert_eq!(a, SubmissionOutcome::Delivered { attempts: 2 });
    assert_eq!(a, b);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn settled_key_is_not_resent() {
    let transport = Arc::new(ScriptedTransport::default());
    let pipeline = pipeline(Arc::clone(&transport));
    let policy = RetryPolicy::default();

    let first = pipeline.submit(status("W1", "x"), "status:W1:x", policy).await;
    let second = pipeline.submit(status("W1", "x"), "status:W1:x", policy).await;

    assert!(first.is_saved());
    assert_eq!(second, SubmissionOutcome::AlreadySettled);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_cancel_job() {
    let transport = Arc::new(ScriptedTransport::failing(2));
    let pipeline = pipeline(Arc::clone(&transport));
    let policy = RetryPolicy::new(5, Duration::from_millis(100));

    let waiter = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.submit(status("W1", "y"), "status:W1:y", policy).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();

    pipeline.settle_outstanding().await;
    assert_eq!(transport.calls(), 3);
    assert!(pipeline.store().is_settled("status:W1:y"));
}

// ============================================================================
// Session data
// ============================================================================

#[tokio::test(start_paused = true)]
async fn exhausted_session_names_contact() {
    let transport = Arc::new(ScriptedTransport::failing(10));
    let pipeline = pipeline(Arc::clone(&transport));
    let session = SessionRecord::new("stroop", ParticipantIdentity::debug()).finish();

    let err = pipeline
        .submit_session(&session, RetryPolicy::new(2, Duration::from_millis(10)))
        .await
        .unwrap_err();

    let SubmissionError::Exhausted { attempts, contact } = &err else {
        panic!("expected exhaustion, got {err}");
    };
    assert_eq!(*attempts, 2);
    assert_eq!(contact, "lab@example.org");
    assert!(err.to_string().contains("lab@example.org"));
}

// ============================================================================
// HTTP transport against a local store
// ============================================================================

#[tokio::test]
async fn http_transport_retries_through_503() {
    let store = MockStore::start(2).await;
    let transport = HttpTransport::new(&format!("{}/", store.base_url), Duration::from_secs(5)).unwrap();
    let pipeline = Arc::new(SubmissionPipeline::new(
        Arc::new(transport),
        Arc::new(LocalState::in_memory()),
        "lab@example.org",
    ));

    let mut session = SessionRecord::new(
        "stroop",
        ParticipantIdentity {
            worker_id: "W42".into(),
            hit_id: Some("H1".into()),
            assignment_id: None,
            platform: Some(Platform::Turk),
        },
    );
    session.condition = Some("congruent".into());
    let session = session.finish();

    let outcome = pipeline
        .submit_session(&session, RetryPolicy::new(3, Duration::from_millis(20)))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Delivered { attempts: 3 });
    assert_eq!(store.data_count(), 1);

    let body = store.log.data.lock().unwrap()[0].clone();
    assert_eq!(body["worker_id"], "W42");
    assert_eq!(body["hit_id"], "H1");
    assert_eq!(body["platform"], "turk");
    assert_eq!(body["condition"], "congruent");
    assert_eq!(body["payload"]["experiment_name"], "stroop");
}

#[tokio::test]
async fn http_transport_patches_status() {
    let store = MockStore::start(0).await;
    let transport = HttpTransport::new(&store.base_url, Duration::from_secs(5)).unwrap();
    let pipeline = Arc::new(SubmissionPipeline::new(
        Arc::new(transport),
        Arc::new(LocalState::in_memory()),
        "lab@example.org",
    ));

    let outcome = pipeline
        .update_status("W42", "working_finished_consent", RetryPolicy::new(1, Duration::ZERO))
        .await;
    assert!(outcome.is_saved());

    let bodies = store.log.status.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["worker_id"], "W42");
    assert_eq!(bodies[0]["status"], "working_finished_consent");
}

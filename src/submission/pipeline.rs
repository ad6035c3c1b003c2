//! Resilient submission pipeline
//!
//! Each job retries at a fixed interval until the transport reports
//! success or the attempt budget is spent. Jobs are keyed by a dedupe key:
//! while one is outstanding, later callers with the same key wait for its
//! result instead of starting a second job. Successful keys are recorded
//! in [`LocalState`] so a restarted session does not send them again.
//!
//! Jobs run on their own task and have no cancel signal. Dropping the
//! future returned by [`SubmissionPipeline::submit`] only stops waiting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::schema::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WAIT_MS, SubmissionSettings};
use crate::error::SubmissionError;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::timeline::session::SessionRecord;

use super::store::LocalState;
use super::transport::{DataSubmission, StatusUpdate, SubmissionRequest, SubmissionTransport};

/// Attempt budget and fixed wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Wait after each failed attempt except the last
    pub wait: Duration,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to 1 if zero.
    #[must_use]
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// Policy for session data.
    #[must_use]
    pub fn for_data(settings: &SubmissionSettings) -> Self {
        Self::new(settings.max_attempts, Duration::from_millis(settings.wait_ms))
    }

    /// Policy for status updates.
    #[must_use]
    pub fn for_status(settings: &SubmissionSettings) -> Self {
        Self::new(
            settings.status_max_attempts.unwrap_or(settings.max_attempts),
            Duration::from_millis(settings.wait_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(DEFAULT_WAIT_MS))
    }
}

/// One in-flight persistence attempt, retried in place.
#[derive(Debug, Clone)]
pub struct SubmissionJob {
    /// What to deliver
    pub request: SubmissionRequest,
    /// Deduplication key
    pub dedupe_key: String,
    /// Attempts made so far
    pub attempt_count: u32,
    /// Budget and wait
    pub policy: RetryPolicy,
}

/// Settled result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Delivered after `attempts` attempts
    Delivered {
        /// Attempts spent
        attempts: u32,
    },
    /// The key was already delivered earlier; nothing was sent
    AlreadySettled,
    /// Every attempt failed
    Exhausted {
        /// Attempts spent
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },
}

impl SubmissionOutcome {
    /// Returns true for `Delivered` and `AlreadySettled`.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::AlreadySettled)
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::AlreadySettled => "already_settled",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    const fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Exhausted { attempts, .. } => *attempts,
            Self::AlreadySettled => 0,
        }
    }
}

type Settled = watch::Receiver<Option<SubmissionOutcome>>;

/// Retrying, deduplicating front of a [`SubmissionTransport`].
pub struct SubmissionPipeline {
    transport: Arc<dyn SubmissionTransport>,
    store: Arc<LocalState>,
    outstanding: DashMap<String, Settled>,
    contact: String,
    emitter: Option<Arc<EventEmitter>>,
}

impl std::fmt::Debug for SubmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPipeline")
            .field("outstanding", &self.outstanding.len())
            .field("contact", &self.contact)
            .finish_non_exhaustive()
    }
}

impl SubmissionPipeline {
    /// Creates a pipeline.
    ///
    /// `contact` is named in the fatal error shown after exhaustion.
    #[must_use]
    pub fn new(
        transport: Arc<dyn SubmissionTransport>,
        store: Arc<LocalState>,
        contact: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            outstanding: DashMap::new(),
            contact: contact.into(),
            emitter: None,
        }
    }

    /// Attaches a structured event sink.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// The local state the pipeline settles keys in.
    #[must_use]
    pub fn store(&self) -> &Arc<LocalState> {
        &self.store
    }

    /// Number of jobs still in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Delivers `request`, or joins the job already delivering `dedupe_key`.
    ///
    /// The settled check and job creation happen under the same map entry
    /// lock, so two callers can never both start a job for one key.
    pub async fn submit(
        self: &Arc<Self>,
        request: SubmissionRequest,
        dedupe_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> SubmissionOutcome {
        let dedupe_key = dedupe_key.into();
        let mut settled = match self.outstanding.entry(dedupe_key.clone()) {
            Entry::Occupied(entry) => {
                debug!(key = %dedupe_key, "joining outstanding submission");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                if self.store.is_settled(&dedupe_key) {
                    info!(key = %dedupe_key, "already saved, not resubmitting");
                    self.emit_settled(&dedupe_key, &SubmissionOutcome::AlreadySettled);
                    return SubmissionOutcome::AlreadySettled;
                }
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());
                let job = SubmissionJob {
                    request,
                    dedupe_key: dedupe_key.clone(),
                    attempt_count: 0,
                    policy,
                };
                let pipeline = Arc::clone(self);
                tokio::spawn(async move { pipeline.run_job(job, tx).await });
                rx
            }
        };

        let result = settled
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| value.clone());
        result.unwrap_or_else(|| SubmissionOutcome::Exhausted {
            attempts: 0,
            last_error: "submission task ended without a result".to_string(),
        })
    }

    /// Saves a finished session under the key `data:<experiment>`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Exhausted`], naming the contact address,
    /// when every attempt failed, and [`SubmissionError::Encode`] if the
    /// record cannot be encoded.
    pub async fn submit_session(
        self: &Arc<Self>,
        session: &SessionRecord,
        policy: RetryPolicy,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let request = SubmissionRequest::Data(DataSubmission::from_session(session)?);
        let key = format!("data:{}", session.experiment_name);
        match self.submit(request, key, policy).await {
            SubmissionOutcome::Exhausted { attempts, last_error } => {
                error!(attempts, %last_error, contact = %self.contact, "session data could not be saved");
                Err(SubmissionError::Exhausted {
                    attempts,
                    contact: self.contact.clone(),
                })
            }
            outcome => Ok(outcome),
        }
    }

    /// Reports a participant status under the key `status:<worker>:<status>`.
    pub async fn update_status(
        self: &Arc<Self>,
        worker_id: &str,
        status: &str,
        policy: RetryPolicy,
    ) -> SubmissionOutcome {
        let request = SubmissionRequest::Status(StatusUpdate {
            worker_id: worker_id.to_string(),
            status: status.to_string(),
        });
        self.submit(request, format!("status:{worker_id}:{status}"), policy)
            .await
    }

    /// Waits until every outstanding job has settled.
    pub async fn settle_outstanding(&self) {
        loop {
            let pending: Vec<Settled> = self
                .outstanding
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            if pending.is_empty() {
                return;
            }
            for mut rx in pending {
                let _ = rx.wait_for(Option::is_some).await;
            }
        }
    }

    async fn run_job(
        self: Arc<Self>,
        mut job: SubmissionJob,
        tx: watch::Sender<Option<SubmissionOutcome>>,
    ) {
        let kind = job.request.kind();
        let outcome = loop {
            job.attempt_count += 1;
            let result = self.transport.send(&job.request).await;
            metrics::record_submission_attempt(kind, result.is_ok());
            self.emit(Event::SubmissionAttempt {
                timestamp: Utc::now(),
                dedupe_key: job.dedupe_key.clone(),
                attempt: job.attempt_count,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            });

            match result {
                Ok(()) => {
                    info!(key = %job.dedupe_key, attempts = job.attempt_count, "submission delivered");
                    break SubmissionOutcome::Delivered {
                        attempts: job.attempt_count,
                    };
                }
                Err(e) if job.attempt_count >= job.policy.max_attempts => {
                    metrics::record_submission_exhausted(kind);
                    break SubmissionOutcome::Exhausted {
                        attempts: job.attempt_count,
                        last_error: e.to_string(),
                    };
                }
                Err(e) => {
                    warn!(
                        key = %job.dedupe_key,
                        attempt = job.attempt_count,
                        max_attempts = job.policy.max_attempts,
                        error = %e,
                        "submission attempt failed, retrying"
                    );
                    tokio::time::sleep(job.policy.wait).await;
                }
            }
        };

        if let Err(e) = self.store.mark_settled(&job.dedupe_key, outcome.is_saved()) {
            warn!(key = %job.dedupe_key, error = %e, "could not persist saved flag");
        }
        self.outstanding.remove(&job.dedupe_key);
        self.emit_settled(&job.dedupe_key, &outcome);
        let _ = tx.send(Some(outcome));
    }

    fn emit_settled(&self, key: &str, outcome: &SubmissionOutcome) {
        self.emit(Event::SubmissionSettled {
            timestamp: Utc::now(),
            dedupe_key: key.to_string(),
            result: outcome.label().to_string(),
            attempts: outcome.attempts(),
        });
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

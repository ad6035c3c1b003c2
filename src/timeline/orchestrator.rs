//! Timeline orchestrator
//!
//! Runs trial controllers strictly one after another on the current task
//! and collects their outcomes into a [`SessionRecord`]. Completion hooks
//! run synchronously between trials and must hand any slow work off to
//! another task.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, trace, warn};

use crate::config::schema::{TrialConfig, TrialSpec};
use crate::error::ConfigError;
use crate::observability::events::{Event, EventEmitter};
use crate::submission::pipeline::{RetryPolicy, SubmissionPipeline};
use crate::trial::controller::{TrialController, TrialSignal};
use crate::trial::listener::HeldKeys;
use crate::trial::outcome::{Termination, TrialOutcome};

use super::session::SessionRecord;

/// Observer called once per completed trial.
pub trait CompletionHook: Send + Sync {
    /// Called with each outcome before the next trial starts.
    fn on_completion(&self, outcome: &TrialOutcome);
}

impl<F> CompletionHook for F
where
    F: Fn(&TrialOutcome) + Send + Sync,
{
    fn on_completion(&self, outcome: &TrialOutcome) {
        self(outcome);
    }
}

/// Pushes `status_checkpoint` values into the submission pipeline.
///
/// Each update runs on its own task so the next trial is never delayed.
#[derive(Debug)]
pub struct StatusCheckpoints {
    pipeline: Arc<SubmissionPipeline>,
    worker_id: String,
    policy: RetryPolicy,
}

impl StatusCheckpoints {
    /// Creates the hook for `worker_id`.
    #[must_use]
    pub fn new(pipeline: Arc<SubmissionPipeline>, worker_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            pipeline,
            worker_id: worker_id.into(),
            policy,
        }
    }
}

impl CompletionHook for StatusCheckpoints {
    fn on_completion(&self, outcome: &TrialOutcome) {
        let Some(status) = outcome.status_checkpoint.clone() else {
            return;
        };
        let pipeline = Arc::clone(&self.pipeline);
        let worker_id = self.worker_id.clone();
        let policy = self.policy;
        debug!(trial = outcome.trial_index, %status, "status checkpoint");
        tokio::spawn(async move {
            let result = pipeline.update_status(&worker_id, &status, policy).await;
            if !result.is_saved() {
                warn!(%status, ?result, "status update was not saved");
            }
        });
    }
}

/// Ordered list of trials ready to run.
pub struct Timeline {
    trials: Vec<TrialSpec>,
    hooks: Vec<Arc<dyn CompletionHook>>,
    emitter: Option<Arc<EventEmitter>>,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("trials", &self.trials.len())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Timeline {
    /// Validates every trial up front.
    ///
    /// # Errors
    ///
    /// Returns the first trial's [`ConfigError`]; no trial runs in that case.
    pub fn new(trials: &[TrialConfig]) -> Result<Self, ConfigError> {
        let trials = trials
            .iter()
            .enumerate()
            .map(|(i, t)| t.normalize(&format!("trials[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            trials,
            hooks: Vec::new(),
            emitter: None,
        })
    }

    /// Registers a hook called after every completed trial.
    pub fn on_each_completion(&mut self, hook: impl CompletionHook + 'static) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Attaches a structured event sink, shared with every trial.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Number of trials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Returns true if there are no trials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Runs every trial in order and returns the finished record.
    ///
    /// Signals left over from the previous trial are discarded before the
    /// next one starts, though their key presses and releases still count.
    /// A key held across a trial boundary is not a new press. A closed signal channel ends the current trial and
    /// the session, and marks the record `ended_early`.
    pub async fn run(
        &self,
        mut session: SessionRecord,
        signals: &mut UnboundedReceiver<TrialSignal>,
    ) -> SessionRecord {
        info!(
            session = %session.session_id,
            experiment = %session.experiment_name,
            trials = self.trials.len(),
            "session started"
        );
        self.emit(Event::SessionStarted {
            timestamp: Utc::now(),
            session_id: session.session_id.to_string(),
            experiment: session.experiment_name.clone(),
            trial_count: self.trials.len(),
        });

        let held = HeldKeys::new();
        for (index, spec) in self.trials.iter().enumerate() {
            if drain(signals, &held) {
                session.ended_early = true;
                break;
            }

            let mut controller = TrialController::from_spec(index, spec.clone()).with_held_keys(held.clone());
            if let Some(emitter) = &self.emitter {
                controller = controller.with_emitter(Arc::clone(emitter));
            }
            let outcome = controller.run(signals).await;

            for hook in &self.hooks {
                hook.on_completion(&outcome);
            }
            let closed = outcome.terminated_by == Termination::ExternalEnd && signals.is_closed();
            session.push(outcome);

            if closed {
                session.ended_early = true;
                break;
            }
            if !spec.post_trial_gap.is_zero() {
                tokio::time::sleep(spec.post_trial_gap).await;
            }
        }

        let session = session.finish();
        info!(
            session = %session.session_id,
            completed = session.trial_count(),
            ended_early = session.ended_early,
            "session finished"
        );
        self.emit(Event::SessionFinished {
            timestamp: Utc::now(),
            session_id: session.session_id.to_string(),
            trials_completed: session.trial_count(),
            ended_early: session.ended_early,
        });
        session
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

/// Discards queued signals, keeping their key state. Returns true if the
/// channel is closed.
fn drain(signals: &mut UnboundedReceiver<TrialSignal>, held: &HeldKeys) -> bool {
    loop {
        match signals.try_recv() {
            Ok(signal) => {
                trace!(?signal, "discarding signal between trials");
                if let TrialSignal::Input(input) = &signal {
                    held.observe(input);
                }
            }
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

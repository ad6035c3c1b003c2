//! Trial phase controller
//!
//! Drives one trial through `Pending → Displaying → GatedResponse →
//! OpenResponse → Completed`. The controller owns the trial's
//! [`TrialContext`] and processes one timer expiration or input at a time,
//! so every handler observes the phase left behind by the previous one.
//!
//! The stepping methods take explicit instants and are what the async
//! [`TrialController::run`] loop calls; tests use them directly to replay
//! races that land in the same tick.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::schema::{GateInputPolicy, TrialConfig, TrialSpec};
use crate::error::ConfigError;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;

use super::listener::{HeldKeys, InputMatcher, ListenerAction, RawInput};
use super::outcome::{InputSource, ResponseEvent, Termination, TrialOutcome};
use super::recorder::{Recorded, ResponseRecorder};
use super::state::{HeldPress, Phase, PhaseTimer, TrialContext};
use super::timer::TimerHandle;

/// Signals delivered to a running trial from outside.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialSignal {
    /// Participant input
    Input(RawInput),
    /// Skip the rest of the display phase
    Skip,
    /// End the trial now
    End,
}

/// What [`TrialController::handle_input`] did with one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDisposition {
    /// No active subscription matched
    Unmatched,
    /// Arrived before the gate opened and was discarded
    Dropped,
    /// Arrived before the gate opened and was queued for release
    Buffered,
    /// Recorded without ending the trial
    Recorded(Recorded),
    /// Recorded; the trial now waits for the key release
    HoldStarted,
    /// A timed press ended without completing the trial
    HoldMeasured,
    /// The input completed the trial
    Completed,
}

enum Step {
    TimersDue,
    Signal(Option<TrialSignal>),
}

/// State machine for one trial.
#[derive(Debug)]
pub struct TrialController {
    spec: TrialSpec,
    ctx: TrialContext,
    outcome: Option<TrialOutcome>,
    emitter: Option<Arc<EventEmitter>>,
}

impl TrialController {
    /// Builds the controller for the trial at `trial_index`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is missing a
    /// required field or is inconsistent; no trial state is created.
    pub fn new(trial_index: usize, config: &TrialConfig) -> Result<Self, ConfigError> {
        let spec = config.normalize(&format!("trials[{trial_index}]"))?;
        Ok(Self::from_spec(trial_index, spec))
    }

    /// Builds the controller from an already normalized trial.
    #[must_use]
    pub fn from_spec(trial_index: usize, spec: TrialSpec) -> Self {
        let recorder = ResponseRecorder::new(spec.policy);
        Self {
            ctx: TrialContext::new(trial_index, recorder),
            spec,
            outcome: None,
            emitter: None,
        }
    }

    /// Attaches a structured event sink.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Shares key state with the other trials of a session.
    ///
    /// A key still held from an earlier trial is treated as a repeat
    /// until it is released.
    #[must_use]
    pub fn with_held_keys(mut self, held: HeldKeys) -> Self {
        self.ctx.listeners.share_held_keys(held);
        self
    }

    /// Normalized trial this controller runs.
    #[must_use]
    pub const fn spec(&self) -> &TrialSpec {
        &self.spec
    }

    /// Active phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.ctx.phase
    }

    /// Returns true once the completion transition has been taken.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.ctx.guard.is_claimed()
    }

    /// Number of timers still scheduled by this trial.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.ctx.timers.pending()
    }

    /// Number of input subscriptions still attached by this trial.
    #[must_use]
    pub fn active_listeners(&self) -> usize {
        self.ctx.listeners.active()
    }

    /// Earliest pending timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ctx.timers.next_deadline()
    }

    /// Starts the trial: schedules the deadline, opens the listener epoch
    /// and enters `Displaying`.
    ///
    /// Calling `start` on a trial that already left `Pending` does nothing.
    pub fn start(&mut self, now: Instant) {
        if self.ctx.phase != Phase::Pending || self.is_completed() {
            return;
        }
        self.ctx.started_at = Some(now);
        info!(
            trial = self.ctx.trial_index,
            name = self.spec.name.as_deref().unwrap_or(""),
            "trial started"
        );
        self.emit(Event::TrialStarted {
            timestamp: Utc::now(),
            trial_index: self.ctx.trial_index,
            name: self.spec.name.clone(),
        });

        // Scheduled first so that it wins ties with phase timers.
        if let Some(deadline) = self.spec.deadline {
            self.ctx.timers.schedule_at(now + deadline, PhaseTimer::Deadline);
        }

        for input in &self.spec.inputs {
            let matcher = match input.source {
                InputSource::Key if input.keys.is_empty() => {
                    InputMatcher::any().allow_repeat(input.allow_held_key)
                }
                InputSource::Key => {
                    InputMatcher::keys(&input.keys).allow_repeat(input.allow_held_key)
                }
                InputSource::Pointer | InputSource::Submit => InputMatcher::any(),
            };
            self.ctx.listeners.register(
                input.source,
                matcher,
                ListenerAction::Respond {
                    finishes: input.finishes,
                    measure_hold: input.measure_hold,
                },
            );
        }

        self.enter(Phase::Displaying, now);
        match self.spec.display {
            Some(display) => {
                self.ctx.phase_timer = Some(
                    self.ctx
                        .timers
                        .schedule_at(now + display, PhaseTimer::DisplayElapsed),
                );
            }
            None => self.leave_display(now),
        }
    }

    /// Ends the display phase early.
    ///
    /// Returns `false` unless the trial is currently `Displaying`.
    pub fn skip_display(&mut self, now: Instant) -> bool {
        if self.ctx.phase != Phase::Displaying || self.is_completed() {
            return false;
        }
        debug!(trial = self.ctx.trial_index, "display skipped");
        self.leave_display(now);
        true
    }

    /// Dispatches every timer due at `now`, earliest first.
    ///
    /// Each expiration is handled with its scheduled deadline as the
    /// current time. Stops as soon as the trial completes; returns how
    /// many expirations were handled.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while !self.is_completed() {
            let Some(at) = self.ctx.timers.next_deadline().filter(|at| *at <= now) else {
                break;
            };
            let Some((handle, timer)) = self.ctx.timers.pop_due(now) else {
                break;
            };
            fired += 1;
            self.on_timer(handle, timer, at);
        }
        fired
    }

    /// Routes one participant input.
    pub fn handle_input(&mut self, input: RawInput, now: Instant) -> InputDisposition {
        if self.is_completed() {
            // No listeners remain; this only updates key state
            self.ctx.listeners.dispatch(&input);
            return InputDisposition::Unmatched;
        }
        let Some(hit) = self.ctx.listeners.dispatch(&input) else {
            trace!(trial = self.ctx.trial_index, ?input, "input unmatched");
            return InputDisposition::Unmatched;
        };
        let timestamp_ms = self.ctx.elapsed_ms(now);

        match hit.action {
            ListenerAction::Release => {
                let Some(held) = self.ctx.held.take() else {
                    return InputDisposition::Unmatched;
                };
                self.ctx.listeners.unregister(held.release_subscription);
                let hold_ms = timestamp_ms.saturating_sub(held.pressed_at_ms);
                self.ctx.hold_duration_ms = Some(hold_ms);
                debug!(trial = self.ctx.trial_index, key = %held.key, hold_ms, "key released");
                if held.finishes && self.spec.response_ends_trial {
                    self.complete(Termination::Response, now);
                    InputDisposition::Completed
                } else {
                    InputDisposition::HoldMeasured
                }
            }
            ListenerAction::Respond {
                finishes,
                measure_hold,
            } => {
                let event = ResponseEvent {
                    source: hit.source,
                    value: hit.value,
                    timestamp_ms,
                };

                if self.ctx.phase.is_pre_gate() {
                    return self.pre_gate_input(event, finishes, measure_hold);
                }

                let recorded = self.record(event.clone());
                if measure_hold {
                    if self.ctx.held.is_none() {
                        let key = event.value.as_str().unwrap_or_default().to_string();
                        let release_subscription = self.ctx.listeners.register(
                            InputSource::Key,
                            InputMatcher::keys([key.as_str()]),
                            ListenerAction::Release,
                        );
                        self.ctx.held = Some(HeldPress {
                            key,
                            pressed_at_ms: timestamp_ms,
                            release_subscription,
                            finishes,
                        });
                        return InputDisposition::HoldStarted;
                    }
                    return InputDisposition::Recorded(recorded);
                }

                if finishes && self.spec.response_ends_trial {
                    self.complete(Termination::Response, now);
                    InputDisposition::Completed
                } else {
                    InputDisposition::Recorded(recorded)
                }
            }
        }
    }

    /// Ends the trial from outside.
    ///
    /// Returns `false` if the trial had already completed.
    pub fn end(&mut self, now: Instant) -> bool {
        self.complete(Termination::ExternalEnd, now)
    }

    /// Takes the transition into `Completed`.
    ///
    /// Only the first caller wins. Every timer is cancelled before any
    /// further side effect, then every listener is removed and the outcome
    /// is built. Later calls are no-ops returning `false`.
    pub fn complete(&mut self, terminated_by: Termination, now: Instant) -> bool {
        if !self.ctx.guard.try_claim() {
            debug!(
                trial = self.ctx.trial_index,
                %terminated_by,
                "completion already taken"
            );
            return false;
        }

        let timers = self.ctx.timers.cancel_all();
        self.ctx.phase_timer = None;
        let listeners = self.ctx.listeners.unregister_all();
        self.ctx.held = None;
        self.ctx.pre_gate.clear();

        let completed_in = self.ctx.phase;
        self.ctx.phase = Phase::Completed;
        metrics::record_phase_transition(Phase::Completed);

        let elapsed_ms = self.ctx.elapsed_ms(now);
        let recorder = std::mem::take(&mut self.ctx.recorder);
        let first_response = recorder.first().cloned();
        let primary_value = recorder.primary_value();
        let response_events = recorder.into_events();

        info!(
            trial = self.ctx.trial_index,
            from = %completed_in,
            %terminated_by,
            elapsed_ms,
            responses = response_events.len(),
            timers,
            listeners,
            "trial completed"
        );
        metrics::record_trial(
            terminated_by,
            std::time::Duration::from_millis(elapsed_ms),
        );
        self.emit(Event::TrialCompleted {
            timestamp: Utc::now(),
            trial_index: self.ctx.trial_index,
            terminated_by,
            elapsed_ms,
            responses: response_events.len(),
        });

        self.outcome = Some(TrialOutcome {
            trial_index: self.ctx.trial_index,
            name: self.spec.name.clone(),
            metadata: self.spec.metadata.clone(),
            response_events,
            first_response,
            primary_value,
            elapsed_ms,
            terminated_by,
            completed_in,
            hold_duration_ms: self.ctx.hold_duration_ms,
            status_checkpoint: self.spec.status_checkpoint.clone(),
        });
        true
    }

    /// Takes the outcome produced by the completion transition.
    pub fn take_outcome(&mut self) -> Option<TrialOutcome> {
        self.outcome.take()
    }

    /// Runs the trial to completion on the current task.
    ///
    /// Timer expirations take priority over signals that become ready in
    /// the same poll. A closed signal channel ends the trial.
    pub async fn run(mut self, signals: &mut UnboundedReceiver<TrialSignal>) -> TrialOutcome {
        self.start(Instant::now());
        loop {
            if let Some(outcome) = self.outcome.take() {
                return outcome;
            }

            let step = tokio::select! {
                biased;
                () = self.ctx.timers.wait_due() => Step::TimersDue,
                signal = signals.recv() => Step::Signal(signal),
            };

            let now = Instant::now();
            match step {
                Step::TimersDue => {
                    self.fire_due(now);
                }
                Step::Signal(Some(TrialSignal::Input(input))) => {
                    self.fire_due(now);
                    self.handle_input(input, now);
                }
                Step::Signal(Some(TrialSignal::Skip)) => {
                    self.fire_due(now);
                    self.skip_display(now);
                }
                Step::Signal(Some(TrialSignal::End) | None) => {
                    self.end(now);
                }
            }
        }
    }

    fn on_timer(&mut self, handle: TimerHandle, timer: PhaseTimer, at: Instant) {
        match timer {
            PhaseTimer::Deadline => {
                self.complete(Termination::Timeout, at);
            }
            PhaseTimer::DisplayElapsed
                if self.ctx.phase == Phase::Displaying && self.ctx.phase_timer == Some(handle) =>
            {
                self.ctx.phase_timer = None;
                self.leave_display(at);
            }
            PhaseTimer::GateElapsed
                if self.ctx.phase == Phase::GatedResponse
                    && self.ctx.phase_timer == Some(handle) =>
            {
                self.ctx.phase_timer = None;
                self.open_gate(at);
            }
            PhaseTimer::DisplayElapsed | PhaseTimer::GateElapsed => {
                debug!(trial = self.ctx.trial_index, %handle, ?timer, phase = %self.ctx.phase, "stale timer ignored");
            }
        }
    }

    fn leave_display(&mut self, now: Instant) {
        self.ctx.cancel_phase_timer();
        self.enter(Phase::GatedResponse, now);
        match self.spec.gate {
            Some(gate) => {
                self.ctx.phase_timer =
                    Some(self.ctx.timers.schedule_at(now + gate, PhaseTimer::GateElapsed));
            }
            None => self.open_gate(now),
        }
    }

    fn open_gate(&mut self, now: Instant) {
        self.ctx.cancel_phase_timer();
        self.enter(Phase::OpenResponse, now);

        let queued = std::mem::take(&mut self.ctx.pre_gate);
        if !queued.is_empty() {
            debug!(trial = self.ctx.trial_index, count = queued.len(), "releasing pre-gate input");
        }
        for (event, finishes) in queued {
            self.record(event);
            if finishes && self.spec.response_ends_trial {
                self.complete(Termination::Response, now);
                return;
            }
        }
    }

    fn pre_gate_input(
        &mut self,
        event: ResponseEvent,
        finishes: bool,
        measure_hold: bool,
    ) -> InputDisposition {
        match self.spec.gate_input {
            GateInputPolicy::Release if !measure_hold => {
                trace!(trial = self.ctx.trial_index, phase = %self.ctx.phase, "input queued before gate");
                self.ctx.pre_gate.push((event, finishes));
                InputDisposition::Buffered
            }
            GateInputPolicy::Release | GateInputPolicy::Drop => {
                trace!(trial = self.ctx.trial_index, phase = %self.ctx.phase, "input dropped before gate");
                InputDisposition::Dropped
            }
        }
    }

    fn record(&mut self, event: ResponseEvent) -> Recorded {
        let source = event.source;
        let elapsed_ms = event.timestamp_ms;
        let recorded = self.ctx.recorder.record(event);
        if recorded != Recorded::Ignored {
            metrics::record_response(source);
            self.emit(Event::ResponseRecorded {
                timestamp: Utc::now(),
                trial_index: self.ctx.trial_index,
                source,
                elapsed_ms,
                primary: recorded == Recorded::Primary,
            });
        }
        recorded
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        let from = self.ctx.phase;
        self.ctx.phase = phase;
        let elapsed_ms = self.ctx.elapsed_ms(now);
        debug!(trial = self.ctx.trial_index, %from, to = %phase, elapsed_ms, "phase transition");
        metrics::record_phase_transition(phase);
        self.emit(Event::PhaseEntered {
            timestamp: Utc::now(),
            trial_index: self.ctx.trial_index,
            phase,
            elapsed_ms,
        });
    }

    fn emit(&self, event: Event) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::schema::AcceptedInput;
    use crate::observability::events::tests::TestWriter;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn down(key: &str) -> RawInput {
        RawInput::KeyDown {
            key: key.to_string(),
            repeat: false,
        }
    }

    fn timed(display: u64, gate: u64, deadline: u64) -> TrialConfig {
        TrialConfig {
            display_duration_ms: Some(display),
            gate_duration_ms: Some(gate),
            trial_duration_ms: Some(deadline),
            ..TrialConfig::with_inputs(vec![AcceptedInput::keys(["f", "j"])])
        }
    }

    fn controller(config: &TrialConfig) -> TrialController {
        TrialController::new(0, config).unwrap()
    }

    fn t0() -> Instant {
        Instant::from_std(std::time::Instant::now())
    }

    #[test]
    fn test_missing_inputs_rejected_before_start() {
        let err = TrialController::new(2, &TrialConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref location, .. } if location == "trials[2]"));
    }

    #[test]
    fn test_phases_follow_timers() {
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 5000));
        assert_eq!(c.phase(), Phase::Pending);

        c.start(t0);
        assert_eq!(c.phase(), Phase::Displaying);
        c.fire_due(t0 + ms(99));
        assert_eq!(c.phase(), Phase::Displaying);
        c.fire_due(t0 + ms(100));
        assert_eq!(c.phase(), Phase::GatedResponse);
        c.fire_due(t0 + ms(300));
        assert_eq!(c.phase(), Phase::OpenResponse);

        assert_eq!(c.handle_input(down("f"), t0 + ms(350)), InputDisposition::Completed);
        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.elapsed_ms, 350);
        assert_eq!(outcome.terminated_by, Termination::Response);
        assert_eq!(outcome.response_events.len(), 1);
        assert_eq!(outcome.primary_value, Some(json!("f")));
        assert_eq!(outcome.completed_in, Phase::OpenResponse);
    }

    #[test]
    fn test_zero_duration_phases_exit_on_entry() {
        let t0 = t0();
        let mut c = controller(&timed(0, 0, 1000));
        c.start(t0);
        assert_eq!(c.phase(), Phase::OpenResponse);
        // Only the deadline remains
        assert_eq!(c.pending_timers(), 1);
    }

    #[test]
    fn test_deadline_inside_gate_times_out() {
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 150));
        c.start(t0);
        c.fire_due(t0 + ms(1000));

        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.terminated_by, Termination::Timeout);
        assert_eq!(outcome.elapsed_ms, 150);
        assert_eq!(outcome.completed_in, Phase::GatedResponse);
    }

    #[test]
    fn test_deadline_equal_to_display_plus_gate_times_out() {
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 300));
        c.start(t0);
        c.fire_due(t0 + ms(300));
        assert_eq!(c.take_outcome().unwrap().terminated_by, Termination::Timeout);
    }

    #[test]
    fn test_pre_gate_input_dropped_by_default() {
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 5000));
        c.start(t0);
        assert_eq!(c.handle_input(down("f"), t0 + ms(50)), InputDisposition::Dropped);
        c.handle_input(RawInput::KeyUp { key: "f".into() }, t0 + ms(60));
        c.fire_due(t0 + ms(300));
        assert_eq!(c.phase(), Phase::OpenResponse);
        assert!(!c.is_completed());
    }

    #[test]
    fn test_pre_gate_input_released_at_gate_open() {
        let t0 = t0();
        let config = TrialConfig {
            gate_input: GateInputPolicy::Release,
            ..timed(100, 200, 5000)
        };
        let mut c = controller(&config);
        c.start(t0);
        assert_eq!(c.handle_input(down("j"), t0 + ms(150)), InputDisposition::Buffered);
        c.fire_due(t0 + ms(300));

        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.terminated_by, Termination::Response);
        assert_eq!(outcome.elapsed_ms, 300);
        assert_eq!(outcome.first_response.unwrap().timestamp_ms, 150);
    }

    #[test]
    fn test_same_tick_race_produces_one_outcome() {
        let t0 = t0();
        let mut c = controller(&timed(0, 0, 500));
        c.start(t0);

        assert!(c.complete(Termination::Response, t0 + ms(500)));
        assert!(!c.complete(Termination::Timeout, t0 + ms(500)));
        assert_eq!(c.fire_due(t0 + ms(500)), 0);
        assert!(!c.end(t0 + ms(501)));

        assert_eq!(c.take_outcome().unwrap().terminated_by, Termination::Response);
        assert!(c.take_outcome().is_none());
    }

    #[test]
    fn test_completion_tears_down_everything() {
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 5000));
        c.start(t0);
        assert!(c.pending_timers() > 0);
        assert!(c.active_listeners() > 0);

        c.end(t0 + ms(10));
        assert_eq!(c.pending_timers(), 0);
        assert_eq!(c.active_listeners(), 0);
        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.terminated_by, Termination::ExternalEnd);
        assert_eq!(outcome.completed_in, Phase::Displaying);
    }

    #[test]
    fn test_end_before_start() {
        let mut c = controller(&timed(100, 200, 5000));
        assert!(c.end(t0()));
        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.elapsed_ms, 0);
        assert_eq!(outcome.completed_in, Phase::Pending);
        // A completed trial never starts
        c.start(t0());
        assert_eq!(c.phase(), Phase::Completed);
    }

    #[test]
    fn test_skip_display() {
        let t0 = t0();
        let mut c = controller(&timed(1000, 0, 5000));
        c.start(t0);
        assert!(c.skip_display(t0 + ms(20)));
        assert_eq!(c.phase(), Phase::OpenResponse);
        assert!(!c.skip_display(t0 + ms(30)));
        // The cancelled display timer never fires
        c.fire_due(t0 + ms(1000));
        assert_eq!(c.phase(), Phase::OpenResponse);
    }

    #[test]
    fn test_non_finishing_inputs_are_recorded_until_timeout() {
        let t0 = t0();
        let mut input = AcceptedInput::any(InputSource::Pointer);
        input.finishes = false;
        let config = TrialConfig {
            trial_duration_ms: Some(1000),
            multi_response: true,
            ..TrialConfig::with_inputs(vec![input, AcceptedInput::any(InputSource::Submit)])
        };
        let mut c = controller(&config);
        c.start(t0);

        c.handle_input(RawInput::Pointer { value: json!(30) }, t0 + ms(100));
        c.handle_input(RawInput::Pointer { value: json!(70) }, t0 + ms(200));
        assert!(!c.is_completed());
        assert_eq!(
            c.handle_input(RawInput::Submit { value: json!({}) }, t0 + ms(400)),
            InputDisposition::Completed
        );

        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.response_events.len(), 3);
        assert_eq!(outcome.first_response.unwrap().value, json!(30));
        assert_eq!(outcome.primary_value, Some(json!({})));
    }

    #[test]
    fn test_hold_measured_until_release() {
        let t0 = t0();
        let mut input = AcceptedInput::keys(["space"]);
        input.measure_hold = true;
        let config = TrialConfig::with_inputs(vec![input]);
        let mut c = controller(&config);
        c.start(t0);

        assert_eq!(c.handle_input(down(" "), t0 + ms(200)), InputDisposition::HoldStarted);
        // Auto-repeat while held is filtered
        assert_eq!(
            c.handle_input(
                RawInput::KeyDown {
                    key: " ".into(),
                    repeat: true
                },
                t0 + ms(300)
            ),
            InputDisposition::Unmatched
        );
        assert_eq!(
            c.handle_input(RawInput::KeyUp { key: " ".into() }, t0 + ms(950)),
            InputDisposition::Completed
        );

        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.hold_duration_ms, Some(750));
        assert_eq!(outcome.elapsed_ms, 950);
        assert_eq!(outcome.response_events.len(), 1);
    }

    #[test]
    fn test_response_not_ending_trial() {
        let t0 = t0();
        let config = TrialConfig {
            response_ends_trial: false,
            ..timed(0, 0, 800)
        };
        let mut c = controller(&config);
        c.start(t0);
        assert_eq!(
            c.handle_input(down("f"), t0 + ms(100)),
            InputDisposition::Recorded(Recorded::Primary)
        );
        c.fire_due(t0 + ms(800));
        let outcome = c.take_outcome().unwrap();
        assert_eq!(outcome.terminated_by, Termination::Timeout);
        assert_eq!(outcome.primary_value, Some(json!("f")));
    }

    #[test]
    fn test_emitter_sees_phases_in_order() {
        let tw = TestWriter::default();
        let emitter = Arc::new(EventEmitter::new(Box::new(tw.clone())));
        let t0 = t0();
        let mut c = controller(&timed(100, 200, 5000)).with_emitter(emitter);
        c.start(t0);
        c.fire_due(t0 + ms(300));
        c.handle_input(down("j"), t0 + ms(320));

        let types: Vec<String> = tw
            .lines()
            .iter()
            .map(|l| l["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "TrialStarted",
                "PhaseEntered",
                "PhaseEntered",
                "PhaseEntered",
                "ResponseRecorded",
                "TrialCompleted"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_without_input() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let outcome = controller(&timed(100, 200, 1000)).run(&mut rx).await;

        assert_eq!(outcome.terminated_by, Termination::Timeout);
        assert_eq!(outcome.elapsed_ms, 1000);
        assert!(Instant::now() - start >= ms(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_closed_channel_is_external_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(tx);
        let outcome = controller(&timed(100, 200, 1000)).run(&mut rx).await;
        assert_eq!(outcome.terminated_by, Termination::ExternalEnd);
    }
}

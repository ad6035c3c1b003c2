//! Per-trial state: the active phase, the completion guard, and the
//! context object every timer and input handler operates on.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::listener::{ListenerRegistry, SubscriptionId};
use super::outcome::ResponseEvent;
use super::recorder::ResponseRecorder;
use super::timer::{TimerHandle, TimerService};

/// Lifecycle phase of a trial. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Constructed, not yet started
    #[default]
    Pending,
    /// Stimulus on screen, responses not yet eligible
    Displaying,
    /// Listeners attached but responses not yet eligible
    GatedResponse,
    /// Responses are accepted
    OpenResponse,
    /// Terminal; all timers and listeners are gone
    Completed,
}

impl Phase {
    /// Returns true for the phases where input counts as pre-gate input.
    #[must_use]
    pub const fn is_pre_gate(self) -> bool {
        matches!(self, Self::Displaying | Self::GatedResponse)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Displaying => "displaying",
            Self::GatedResponse => "gated_response",
            Self::OpenResponse => "open_response",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Timer payloads a trial schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTimer {
    /// Display window elapsed
    DisplayElapsed,
    /// Gate window elapsed
    GateElapsed,
    /// Overall trial deadline reached
    Deadline,
}

/// One-shot guard on the transition into `Completed`.
///
/// Uses compare-and-exchange so that exactly one caller wins even if
/// two completion paths run back to back in the same tick.
#[derive(Debug, Default)]
pub struct CompletionGuard {
    completed: AtomicBool,
}

impl CompletionGuard {
    /// Creates an unclaimed guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
        }
    }

    /// Claims the completion transition.
    ///
    /// Returns `true` only for the first caller.
    pub fn try_claim(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns whether the transition has been claimed.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// A key press being timed until its release.
#[derive(Debug, Clone)]
pub struct HeldPress {
    /// Normalized key name
    pub key: String,
    /// Press time, in ms since trial start
    pub pressed_at_ms: u64,
    /// Release listener registered for this press
    pub release_subscription: SubscriptionId,
    /// Whether the release should complete the trial
    pub finishes: bool,
}

/// Everything one trial owns while it runs.
///
/// Timers and input handlers never capture trial state; they receive the
/// context by reference and check the active phase before acting.
#[derive(Debug)]
pub struct TrialContext {
    /// Position of the trial in the timeline
    pub trial_index: usize,
    /// Active phase
    pub phase: Phase,
    /// Guard on the transition into `Completed`
    pub guard: CompletionGuard,
    /// Trial start time (set on entry to `Displaying`)
    pub started_at: Option<Instant>,
    /// Pending timers of this trial
    pub timers: TimerService<PhaseTimer>,
    /// Timer that exits the current phase, if any
    pub phase_timer: Option<TimerHandle>,
    /// Input subscriptions of this trial
    pub listeners: ListenerRegistry,
    /// Captured responses
    pub recorder: ResponseRecorder,
    /// Responses that arrived before the gate opened (release policy only)
    pub pre_gate: Vec<(ResponseEvent, bool)>,
    /// Press currently being timed
    pub held: Option<HeldPress>,
    /// Measured hold duration of the completed press
    pub hold_duration_ms: Option<u64>,
}

impl TrialContext {
    /// Creates a fresh context for the trial at `trial_index`.
    #[must_use]
    pub fn new(trial_index: usize, recorder: ResponseRecorder) -> Self {
        Self {
            trial_index,
            phase: Phase::Pending,
            guard: CompletionGuard::new(),
            started_at: None,
            timers: TimerService::new(),
            phase_timer: None,
            listeners: ListenerRegistry::new(trial_index),
            recorder,
            pre_gate: Vec::new(),
            held: None,
            hold_duration_ms: None,
        }
    }

    /// Milliseconds elapsed since the trial started.
    #[must_use]
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        self.started_at.map_or(0, |start| {
            u64::try_from(now.saturating_duration_since(start).as_millis()).unwrap_or(u64::MAX)
        })
    }

    /// Cancels the timer that would exit the current phase.
    pub fn cancel_phase_timer(&mut self) {
        if let Some(handle) = self.phase_timer.take() {
            self.timers.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::recorder::ResponsePolicy;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_guard_first_claim_wins() {
        let guard = CompletionGuard::new();
        assert!(!guard.is_claimed());
        assert!(guard.try_claim());
        assert!(!guard.try_claim());
        assert!(guard.is_claimed());
    }

    #[test]
    fn test_concurrent_claims_only_one_wins() {
        let guard = Arc::new(CompletionGuard::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let g = Arc::clone(&guard);
            handles.push(thread::spawn(move || g.try_claim()));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_phase_display_and_pre_gate() {
        assert_eq!(Phase::GatedResponse.to_string(), "gated_response");
        assert!(Phase::Displaying.is_pre_gate());
        assert!(Phase::GatedResponse.is_pre_gate());
        assert!(!Phase::OpenResponse.is_pre_gate());
        assert_eq!(Phase::default(), Phase::Pending);
    }

    #[test]
    fn test_elapsed_ms_before_start_is_zero() {
        let ctx = TrialContext::new(0, ResponseRecorder::new(ResponsePolicy::AllWins));
        let now = Instant::from_std(std::time::Instant::now());
        assert_eq!(ctx.elapsed_ms(now), 0);
    }

    #[test]
    fn test_cancel_phase_timer() {
        let mut ctx = TrialContext::new(3, ResponseRecorder::new(ResponsePolicy::AllWins));
        let now = Instant::from_std(std::time::Instant::now());
        ctx.started_at = Some(now);
        ctx.phase_timer = Some(
            ctx.timers
                .schedule_at(now + Duration::from_millis(10), PhaseTimer::DisplayElapsed),
        );
        assert_eq!(ctx.timers.pending(), 1);

        ctx.cancel_phase_timer();
        assert_eq!(ctx.timers.pending(), 0);
        assert!(ctx.phase_timer.is_none());
        assert_eq!(ctx.elapsed_ms(now + Duration::from_millis(42)), 42);
    }
}

//! Ordered capture of response events under a per-trial policy.

use serde_json::Value;

use super::outcome::ResponseEvent;

/// How later responses relate to the authoritative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// The first response is authoritative.
    FirstWins {
        /// Keep later responses in the event history
        keep_history: bool,
    },
    /// Every response is retained; the most recent is authoritative.
    AllWins,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::FirstWins { keep_history: true }
    }
}

/// What [`ResponseRecorder::record`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The event is now the authoritative response
    Primary,
    /// Appended to the history only
    Logged,
    /// Discarded
    Ignored,
}

/// Accumulates the responses of one trial.
#[derive(Debug, Clone, Default)]
pub struct ResponseRecorder {
    policy: ResponsePolicy,
    events: Vec<ResponseEvent>,
}

impl ResponseRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub const fn new(policy: ResponsePolicy) -> Self {
        Self {
            policy,
            events: Vec::new(),
        }
    }

    /// Records one event. Never fails; equal timestamps keep arrival order.
    pub fn record(&mut self, event: ResponseEvent) -> Recorded {
        match self.policy {
            ResponsePolicy::AllWins => {
                self.events.push(event);
                Recorded::Primary
            }
            ResponsePolicy::FirstWins { .. } if self.events.is_empty() => {
                self.events.push(event);
                Recorded::Primary
            }
            ResponsePolicy::FirstWins { keep_history: true } => {
                self.events.push(event);
                Recorded::Logged
            }
            ResponsePolicy::FirstWins { keep_history: false } => Recorded::Ignored,
        }
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> ResponsePolicy {
        self.policy
    }

    /// Recorded events in arrival order.
    #[must_use]
    pub fn events(&self) -> &[ResponseEvent] {
        &self.events
    }

    /// Earliest recorded event.
    #[must_use]
    pub fn first(&self) -> Option<&ResponseEvent> {
        self.events.first()
    }

    /// Authoritative event under the policy.
    #[must_use]
    pub fn primary(&self) -> Option<&ResponseEvent> {
        match self.policy {
            ResponsePolicy::FirstWins { .. } => self.events.first(),
            ResponsePolicy::AllWins => self.events.last(),
        }
    }

    /// Value of the authoritative event.
    #[must_use]
    pub fn primary_value(&self) -> Option<Value> {
        self.primary().map(|e| e.value.clone())
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Consumes the recorder, returning the events.
    #[must_use]
    pub fn into_events(self) -> Vec<ResponseEvent> {
        self.events
    }
}

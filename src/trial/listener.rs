//! Input listener registry scoped to one trial.
//!
//! A registry is created fresh for every trial and torn down with
//! [`ListenerRegistry::unregister_all`] on entry to `Completed`. Which keys
//! are physically held lives in [`HeldKeys`], which outlives the registry
//! so that a press is reported at most once per press-release cycle even
//! when it spans a trial boundary.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, trace};

use super::outcome::InputSource;

/// Raw input as delivered by the participant's device.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// A key went down (or auto-repeated, when `repeat` is set)
    KeyDown {
        /// Key name as reported by the device
        key: String,
        /// Device-reported auto-repeat flag
        repeat: bool,
    },
    /// A key was released
    KeyUp {
        /// Key name as reported by the device
        key: String,
    },
    /// Pointer interaction carrying the widget value
    Pointer {
        /// Widget value (slider position, clicked choice)
        value: Value,
    },
    /// Form or button submission
    Submit {
        /// Submitted fields
        value: Value,
    },
}

impl RawInput {
    /// Device the input came from.
    #[must_use]
    pub const fn source(&self) -> InputSource {
        match self {
            Self::KeyDown { .. } | Self::KeyUp { .. } => InputSource::Key,
            Self::Pointer { .. } => InputSource::Pointer,
            Self::Submit { .. } => InputSource::Submit,
        }
    }
}

/// Normalizes a key name: lower-case, with the space bar spelled `space`.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    match key {
        " " => "space".to_string(),
        other => {
            let lower = other.trim().to_lowercase();
            if lower == "spacebar" {
                "space".to_string()
            } else {
                lower
            }
        }
    }
}

/// Keys currently held down, shared by every trial of a session.
///
/// Cloning yields a handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct HeldKeys {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl HeldKeys {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as down. Returns `false` if it was already held.
    pub fn press(&self, key: &str) -> bool {
        self.lock().insert(normalize_key(key))
    }

    /// Marks `key` as released. Returns `false` if it was not held.
    pub fn release(&self, key: &str) -> bool {
        self.lock().remove(&normalize_key(key))
    }

    /// Returns whether `key` is held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.lock().contains(&normalize_key(key))
    }

    /// Applies the key state change of an input nobody dispatches.
    pub fn observe(&self, input: &RawInput) {
        match input {
            RawInput::KeyDown { key, .. } => {
                self.press(key);
            }
            RawInput::KeyUp { key } => {
                self.release(key);
            }
            RawInput::Pointer { .. } | RawInput::Submit { .. } => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.keys.lock().expect("held keys lock poisoned")
    }
}

/// Which concrete inputs a subscription reacts to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputMatcher {
    keys: Vec<String>,
    allow_repeat: bool,
}

impl InputMatcher {
    /// Matches any key (or any pointer / submit event).
    #[must_use]
    pub const fn any() -> Self {
        Self {
            keys: Vec::new(),
            allow_repeat: false,
        }
    }

    /// Matches only the listed keys.
    #[must_use]
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().map(|k| normalize_key(k.as_ref())).collect(),
            allow_repeat: false,
        }
    }

    /// Lets held and auto-repeated key presses through.
    #[must_use]
    pub const fn allow_repeat(mut self, allow: bool) -> Self {
        self.allow_repeat = allow;
        self
    }

    fn matches_key(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.iter().any(|k| k == key)
    }
}

/// What the owner should do when a subscription matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    /// Treat the input as a response
    Respond {
        /// The response may complete the trial
        finishes: bool,
        /// Time the press until its release instead of responding now
        measure_hold: bool,
    },
    /// Key-up half of a timed press
    Release,
}

/// Identifier of one registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    source: InputSource,
    matcher: InputMatcher,
    action: ListenerAction,
}

/// A matched input, ready for the owner to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Subscription that matched
    pub subscription: SubscriptionId,
    /// Action attached to the subscription
    pub action: ListenerAction,
    /// Source of the input
    pub source: InputSource,
    /// Response value (normalized key name for key input)
    pub value: Value,
}

/// Registry of the input subscriptions of one trial.
#[derive(Debug)]
pub struct ListenerRegistry {
    trial_index: usize,
    subscriptions: Vec<Subscription>,
    held: HeldKeys,
    next_id: u64,
}

impl ListenerRegistry {
    /// Creates an empty registry for the trial at `trial_index`.
    ///
    /// Key state starts empty; use [`ListenerRegistry::share_held_keys`]
    /// to carry it over from earlier trials.
    #[must_use]
    pub fn new(trial_index: usize) -> Self {
        Self {
            trial_index,
            subscriptions: Vec::new(),
            held: HeldKeys::new(),
            next_id: 0,
        }
    }

    /// Tracks key state in `held` instead of a private set.
    pub fn share_held_keys(&mut self, held: HeldKeys) {
        self.held = held;
    }

    /// Registers a subscription and returns its id.
    pub fn register(
        &mut self,
        source: InputSource,
        matcher: InputMatcher,
        action: ListenerAction,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        trace!(trial = self.trial_index, %id, %source, "listener registered");
        self.subscriptions.push(Subscription {
            id,
            source,
            matcher,
            action,
        });
        id
    }

    /// Removes one subscription. Returns `false` if it was not active.
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    /// Swaps the matcher of an active subscription.
    ///
    /// The old subscription is removed and a new id is returned, so the
    /// previous handle can never match again. Returns `None` if `id` was
    /// not active.
    pub fn replace(&mut self, id: SubscriptionId, matcher: InputMatcher) -> Option<SubscriptionId> {
        let pos = self.subscriptions.iter().position(|s| s.id == id)?;
        let old = self.subscriptions.remove(pos);
        Some(self.register(old.source, matcher, old.action))
    }

    /// Removes every subscription. Held keys stay held.
    ///
    /// Idempotent; returns how many subscriptions were removed.
    pub fn unregister_all(&mut self) -> usize {
        let removed = self.subscriptions.len();
        self.subscriptions.clear();
        if removed > 0 {
            debug!(trial = self.trial_index, removed, "listeners torn down");
        }
        removed
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns whether `id` is still registered.
    #[must_use]
    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }

    /// Routes one raw input to the first matching subscription.
    ///
    /// Key state is tracked even when nothing matches, so a press that
    /// started before a listener existed still counts as held.
    pub fn dispatch(&mut self, input: &RawInput) -> Option<Dispatch> {
        match input {
            RawInput::KeyDown { key, repeat } => {
                let key = normalize_key(key);
                let is_repeat = !self.held.press(&key) || *repeat;
                self.subscriptions
                    .iter()
                    .find(|s| {
                        s.source == InputSource::Key
                            && matches!(s.action, ListenerAction::Respond { .. })
                            && s.matcher.matches_key(&key)
                            && (!is_repeat || s.matcher.allow_repeat)
                    })
                    .map(|s| Dispatch {
                        subscription: s.id,
                        action: s.action,
                        source: InputSource::Key,
                        value: Value::String(key.clone()),
                    })
            }
            RawInput::KeyUp { key } => {
                let key = normalize_key(key);
                self.held.release(&key);
                self.subscriptions
                    .iter()
                    .find(|s| {
                        s.source == InputSource::Key
                            && s.action == ListenerAction::Release
                            && s.matcher.matches_key(&key)
                    })
                    .map(|s| Dispatch {
                        subscription: s.id,
                        action: s.action,
                        source: InputSource::Key,
                        value: Value::String(key.clone()),
                    })
            }
            RawInput::Pointer { value } | RawInput::Submit { value } => {
                let source = input.source();
                self.subscriptions
                    .iter()
                    .find(|s| s.source == source && matches!(s.action, ListenerAction::Respond { .. }))
                    .map(|s| Dispatch {
                        subscription: s.id,
                        action: s.action,
                        source,
                        value: value.clone(),
                    })
            }
        }
    }
}
